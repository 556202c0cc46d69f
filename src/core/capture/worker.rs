use crate::core::error::WorkerError;
use log::error;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// 已提交到线程池的任务；等待超时后仍可继续等待，拿到结果后即丢弃
pub struct PendingJob<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> PendingJob<T> {
    pub async fn wait(&mut self, timeout: Duration) -> Result<T, WorkerError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(WorkerError::Dropped),
            Err(_) => Err(WorkerError::Timeout(timeout)),
        }
    }
}

/// 固定大小的 CPU 线程池，比对 / 哈希任务在这里执行，结果通过 oneshot 异步返回
#[derive(Clone)]
pub struct WorkerPool {
    pool: Arc<ThreadPool>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self, WorkerError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("slide-worker-{}", i))
            // 任务 panic 时发送端被丢弃，调用方收到 Dropped
            .panic_handler(|_| error!("💥 worker job panicked"))
            .build()
            .map_err(|e| WorkerError::Build(e.to_string()))?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn submit<F, T>(&self, job: F) -> PendingJob<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.pool.spawn(move || {
            let _ = tx.send(job());
        });
        PendingJob { rx }
    }

    /// 超时后不再等待结果，任务本身会在后台执行完
    pub async fn run<F, T>(&self, timeout: Duration, job: F) -> Result<T, WorkerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit(job).wait(timeout).await
    }
}

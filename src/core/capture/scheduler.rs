//! 采集任务调度器
//!
//! 每个任务一个 tokio 协程：按 `checkInterval` 轮询截帧，比对放到 CPU 线程池，
//! 确认的新幻灯片交给持久化协作方。同一会话的下一次截帧要等上一帧的判定和
//! 持久化都完成；不同会话之间互不等待。

use super::collaborators::{FrameSource, PlaybackMonitor, SlideMetadata, SlideSink};
use super::session::{CaptureSession, Evaluation};
use super::task::{TaskCounts, TaskEvent, TaskEventKind, TaskId, TaskShared, TaskSnapshot, TaskSpec, TaskState};
use super::worker::{PendingJob, WorkerPool};
use crate::core::config::SchedulerConfig;
use crate::core::error::{SchedulerError, SinkError, SourceError, WorkerError};
use crate::core::video::detector::{AcceptedSlide, Decision};
use crate::core::video::exclusion::ExclusionRegistry;
use crate::core::video::similarity::{GlobalSsim, StructuralSimilarity};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;

struct SchedulerInner {
    source: Arc<dyn FrameSource>,
    sink: Arc<dyn SlideSink>,
    monitor: Arc<dyn PlaybackMonitor>,
    registry: ExclusionRegistry,
    similarity: Arc<dyn StructuralSimilarity>,
    pool: WorkerPool,
    permits: Arc<Semaphore>,
    events: broadcast::Sender<TaskEvent>,
    tasks: Mutex<Vec<Arc<TaskShared>>>,
}

impl SchedulerInner {
    fn emit(&self, task: &TaskShared, kind: TaskEventKind) {
        // 没有订阅者时发送失败，忽略
        let _ = self.events.send(TaskEvent {
            task_id: task.id,
            session_id: task.session_id.clone(),
            kind,
        });
    }

    fn transition(&self, task: &TaskShared, to: TaskState, reason: Option<String>) -> bool {
        if !task.transition(to, reason.clone()) {
            return false;
        }
        match (to, &reason) {
            (TaskState::Failed, Some(r)) => error!("❌ 任务 {} ({}) 失败: {}", task.name, task.session_id, r),
            _ => info!("📋 任务 {} ({}) → {:?}", task.name, task.session_id, to),
        }
        self.emit(task, TaskEventKind::StateChanged(to));
        true
    }

    fn find(&self, id: TaskId) -> Option<Arc<TaskShared>> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }
}

/// 多会话采集调度器，可克隆后在多处使用
#[derive(Clone)]
pub struct CaptureScheduler {
    inner: Arc<SchedulerInner>,
}

impl CaptureScheduler {
    pub fn new(
        source: Arc<dyn FrameSource>,
        sink: Arc<dyn SlideSink>,
        monitor: Arc<dyn PlaybackMonitor>,
        registry: ExclusionRegistry,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        Self::with_similarity(source, sink, monitor, registry, config, Arc::new(GlobalSsim))
    }

    pub fn with_similarity(
        source: Arc<dyn FrameSource>,
        sink: Arc<dyn SlideSink>,
        monitor: Arc<dyn PlaybackMonitor>,
        registry: ExclusionRegistry,
        config: SchedulerConfig,
        similarity: Arc<dyn StructuralSimilarity>,
    ) -> Result<Self, SchedulerError> {
        let pool = WorkerPool::new(config.worker_threads)?;
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        info!(
            "🚀 调度器启动: {} 个工作线程, 最多 {} 个并发任务",
            pool.threads(),
            config.max_concurrent_tasks
        );

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                source,
                sink,
                monitor,
                registry,
                similarity,
                pool,
                permits: Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1))),
                events,
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn registry(&self) -> &ExclusionRegistry {
        &self.inner.registry
    }

    /// 新建任务；同一会话已有未结束的任务时拒绝
    pub fn add_task(&self, spec: TaskSpec) -> Result<TaskId, SchedulerError> {
        spec.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let session = CaptureSession::new(
            spec.session_id.clone(),
            spec.config,
            self.inner.registry.clone(),
            Arc::clone(&self.inner.similarity),
        )?;

        let task = {
            let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            if tasks
                .iter()
                .any(|t| t.session_id == spec.session_id && !t.state().is_terminal())
            {
                return Err(SchedulerError::DuplicateSession(spec.session_id.to_string()));
            }
            let task = Arc::new(TaskShared::new(spec.session_id, spec.name));
            tasks.push(Arc::clone(&task));
            task
        };

        info!("➕ 新任务 {} ({}) id={}", task.name, task.session_id, task.id);
        self.inner.emit(&task, TaskEventKind::StateChanged(TaskState::Queued));

        let id = task.id;
        runtime.spawn(run_task(Arc::clone(&self.inner), task, session));
        Ok(id)
    }

    /// 立即置为 Cancelled；进行中的比对会跑完，但结果被丢弃
    pub fn cancel(&self, id: TaskId) -> bool {
        let Some(task) = self.inner.find(id) else {
            return false;
        };
        let cancelled = self.inner.transition(&task, TaskState::Cancelled, None);
        task.cancel.cancel();
        cancelled
    }

    pub fn cancel_all(&self) -> usize {
        let tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner).clone();
        tasks
            .iter()
            .filter(|t| {
                let cancelled = self.inner.transition(t, TaskState::Cancelled, None);
                t.cancel.cancel();
                cancelled
            })
            .count()
    }

    pub fn status(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.inner.find(id).map(|t| t.snapshot())
    }

    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|t| t.snapshot())
            .collect()
    }

    pub fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for task in self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner).iter() {
            counts.add(task.state());
        }
        counts
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    /// 等待任务进入终态
    pub async fn wait(&self, id: TaskId) -> Option<TaskSnapshot> {
        let task = self.inner.find(id)?;
        let mut rx = task.subscribe_state();
        // 发送端由任务自身持有，不会提前关闭
        let _ = rx.wait_for(|s| s.is_terminal()).await;
        Some(task.snapshot())
    }

    /// 移除已结束的任务，返回移除数量
    pub fn remove_finished(&self) -> usize {
        let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let before = tasks.len();
        tasks.retain(|t| !t.state().is_terminal());
        before - tasks.len()
    }
}

enum TickOutcome {
    Continue,
    /// 资源类错误（超时、截帧失败、持久化失败），计入重试次数
    Error(String),
    /// 播放器报错，已请求重试
    PlayerRetry,
    Finished(TaskState, Option<String>),
    Cancelled,
}

/// 超时后仍在后台执行的持久化调用
struct PendingSink {
    handle: JoinHandle<Result<bool, SinkError>>,
    slide: AcceptedSlide,
    metadata: SlideMetadata,
}

/// 跨 tick 保留的任务状态
#[derive(Default)]
struct LoopState {
    player_retries: u32,
    /// 超时的比对任务，结束前不提交同一会话的新任务
    stale_job: Option<PendingJob<Evaluation>>,
    /// 超时的持久化调用，结束前不截下一帧
    pending_sink: Option<PendingSink>,
}

async fn run_task(inner: Arc<SchedulerInner>, task: Arc<TaskShared>, session: CaptureSession) {
    let permit = tokio::select! {
        biased;
        _ = task.cancel.cancelled() => return,
        permit = Arc::clone(&inner.permits).acquire_owned() => match permit {
            Ok(p) => p,
            Err(_) => {
                inner.transition(&task, TaskState::Failed, Some("scheduler shut down".into()));
                return;
            }
        },
    };

    if !inner.transition(&task, TaskState::Running, None) {
        return;
    }

    let config = session.config().clone();
    let max_attempts = config.max_retry_attempts;
    let mut interval = tokio::time::interval(config.check_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut failures = 0u32;
    let mut state = LoopState::default();

    loop {
        tokio::select! {
            biased;
            _ = task.cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        task.update_counters(|c| c.ticks += 1);

        match tick(&inner, &task, &session, &mut state).await {
            TickOutcome::Continue => failures = 0,
            TickOutcome::PlayerRetry => {}
            TickOutcome::Cancelled => break,
            TickOutcome::Finished(to, reason) => {
                inner.transition(&task, to, reason);
                break;
            }
            TickOutcome::Error(reason) => {
                failures += 1;
                task.update_counters(|c| c.errors += 1);
                if failures > max_attempts {
                    inner.transition(
                        &task,
                        TaskState::Failed,
                        Some(format!("{} (after {} retries)", reason, max_attempts)),
                    );
                    break;
                }
                warn!(
                    "⚠️ 任务 {} 第 {}/{} 次重试: {}",
                    task.name, failures, max_attempts, reason
                );
                task.update_counters(|c| c.retries += 1);
                inner.emit(
                    &task,
                    TaskEventKind::Retrying {
                        attempt: failures,
                        max: max_attempts,
                        reason,
                    },
                );
            }
        }
    }

    drop(permit);
    debug!("🏁 任务 {} 协程退出 ({:?})", task.name, task.state());
}

async fn tick(
    inner: &Arc<SchedulerInner>,
    task: &Arc<TaskShared>,
    session: &CaptureSession,
    state: &mut LoopState,
) -> TickOutcome {
    let config = session.config();
    let session_id = session.id().clone();

    // 0. 上一轮超时的持久化 / 比对先收尾
    if let Some(mut pending) = state.pending_sink.take() {
        match tokio::time::timeout(config.job_timeout(), &mut pending.handle).await {
            Ok(joined) => {
                debug!("⏳ 会话 {} 上一张幻灯片的持久化已返回", session_id);
                match settle_persist(inner, task, session, joined, &pending.slide, pending.metadata) {
                    TickOutcome::Continue => {}
                    other => return other,
                }
            }
            Err(_) => {
                state.pending_sink = Some(pending);
                return TickOutcome::Error(format!("{} (still running)", SinkError::Timeout));
            }
        }
    }

    if let Some(mut stale) = state.stale_job.take() {
        match stale.wait(config.job_timeout()).await {
            Ok(evaluation) => {
                debug!("🗑️ 会话 {} 超时的比对已结束，撤销其结果", session_id);
                session.discard(evaluation);
            }
            Err(e @ WorkerError::Timeout(_)) => {
                state.stale_job = Some(stale);
                return TickOutcome::Error(format!("{} (still running)", e));
            }
            Err(_) => {}
        }
    }

    // 1. 播放器信号
    let monitor = Arc::clone(&inner.monitor);
    let id = session_id.clone();
    let signals = match tokio::task::spawn_blocking(move || monitor.signals(&id)).await {
        Ok(s) => s,
        Err(e) => return TickOutcome::Error(format!("playback monitor failed: {}", e)),
    };

    if signals.ended && config.auto_detect_end {
        info!("🎬 会话 {} 播放结束", session_id);
        return TickOutcome::Finished(TaskState::Completed, None);
    }

    if signals.player_error {
        if !config.auto_retry_error {
            return TickOutcome::Finished(TaskState::Failed, Some("player reported an error".into()));
        }
        state.player_retries += 1;
        if state.player_retries > config.max_retry_attempts {
            return TickOutcome::Finished(
                TaskState::Failed,
                Some(format!(
                    "player error persisted after {} retries",
                    config.max_retry_attempts
                )),
            );
        }

        let monitor = Arc::clone(&inner.monitor);
        let id = session_id.clone();
        match tokio::task::spawn_blocking(move || monitor.request_retry(&id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("⚠️ 会话 {} 重试请求失败: {}", session_id, e),
            Err(e) => warn!("⚠️ 会话 {} 重试请求失败: {}", session_id, e),
        }

        task.update_counters(|c| c.retries += 1);
        inner.emit(
            task,
            TaskEventKind::Retrying {
                attempt: state.player_retries,
                max: config.max_retry_attempts,
                reason: "player error".into(),
            },
        );
        return TickOutcome::PlayerRetry;
    }
    state.player_retries = 0;

    // 2. 截帧（有界等待）
    let source = Arc::clone(&inner.source);
    let id = session_id.clone();
    let capture = tokio::time::timeout(
        config.capture_timeout(),
        tokio::task::spawn_blocking(move || source.capture_frame(&id)),
    )
    .await;

    let frame = match capture {
        Err(_) => return TickOutcome::Error(SourceError::Timeout.to_string()),
        Ok(Err(e)) => return TickOutcome::Error(SourceError::Failed(e.to_string()).to_string()),
        Ok(Ok(Err(e))) => return TickOutcome::Error(e.to_string()),
        Ok(Ok(Ok(None))) => return TickOutcome::Continue,
        Ok(Ok(Ok(Some(frame)))) => frame,
    };

    if task.cancel.is_cancelled() {
        return TickOutcome::Cancelled;
    }
    task.update_counters(|c| c.frames += 1);

    // 3. 比对（工作线程池，带超时）
    let mut job = inner.pool.submit(session.evaluate_job(frame));
    let evaluation = match job.wait(config.job_timeout()).await {
        Ok(evaluation) => evaluation,
        Err(e @ WorkerError::Timeout(_)) => {
            state.stale_job = Some(job);
            return TickOutcome::Error(e.to_string());
        }
        Err(e) => return TickOutcome::Error(e.to_string()),
    };

    // 任务已取消：结果作废
    if task.cancel.is_cancelled() {
        debug!("🗑️ 会话 {} 已取消，丢弃比对结果", session_id);
        return TickOutcome::Cancelled;
    }

    // 4. 副作用
    match evaluation.decision {
        Decision::Accepted(slide) => {
            let metadata = SlideMetadata::new(slide.index, &slide.fingerprint, &slide.frame);
            let sink = Arc::clone(&inner.sink);
            let token = task.cancel.clone();
            let id = session_id.clone();
            let frame = Arc::clone(&slide.frame);
            let meta = metadata.clone();

            let mut handle = tokio::task::spawn_blocking(move || {
                if token.is_cancelled() {
                    return Ok(false);
                }
                sink.accept_slide(&id, &frame, &meta).map(|_| true)
            });

            match tokio::time::timeout(config.job_timeout(), &mut handle).await {
                Ok(joined) => settle_persist(inner, task, session, joined, &slide, metadata),
                Err(_) => {
                    state.pending_sink = Some(PendingSink {
                        handle,
                        slide,
                        metadata,
                    });
                    TickOutcome::Error(SinkError::Timeout.to_string())
                }
            }
        }
        Decision::Excluded { matched, .. } => {
            task.update_counters(|c| c.slides_excluded += 1);
            inner.emit(
                task,
                TaskEventKind::SlideExcluded {
                    name: matched.name,
                    distance: matched.distance,
                },
            );
            TickOutcome::Continue
        }
        Decision::Pending { .. } | Decision::NoChange(_) => TickOutcome::Continue,
    }
}

/// 持久化成功后才提交参考帧
fn settle_persist(
    inner: &SchedulerInner,
    task: &TaskShared,
    session: &CaptureSession,
    joined: Result<Result<bool, SinkError>, JoinError>,
    slide: &AcceptedSlide,
    metadata: SlideMetadata,
) -> TickOutcome {
    match joined {
        Ok(Ok(true)) => {
            session.commit(slide);
            task.update_counters(|c| c.slides_accepted += 1);
            inner.emit(
                task,
                TaskEventKind::SlideAccepted {
                    index: metadata.index,
                    fingerprint: metadata.fingerprint,
                },
            );
            TickOutcome::Continue
        }
        Ok(Ok(false)) => TickOutcome::Cancelled,
        Ok(Err(e)) => TickOutcome::Error(e.to_string()),
        Err(e) => TickOutcome::Error(SinkError::Failed(e.to_string()).to_string()),
    }
}

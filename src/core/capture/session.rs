use crate::core::config::CaptureConfig;
use crate::core::error::ConfigError;
use crate::core::video::detector::{
    AcceptedSlide, ChangeDetector, Decision, DetectorCheckpoint, ExtractionStats,
};
use crate::core::video::exclusion::ExclusionRegistry;
use crate::core::video::frame::{Frame, SessionId};
use crate::core::video::similarity::StructuralSimilarity;
use std::sync::{Arc, Mutex, PoisonError};

/// 工作线程上的一次判定结果，附带判定前的状态
pub struct Evaluation {
    pub decision: Decision,
    checkpoint: DetectorCheckpoint,
}

/// 单个采集会话：配置 + 独占的判定引擎
///
/// 判定引擎放在 `Arc<Mutex<_>>` 里，比对任务在工作线程上持锁执行；
/// 调度器保证同一会话上一个任务结束前不会提交下一个。
pub struct CaptureSession {
    id: SessionId,
    config: CaptureConfig,
    detector: Arc<Mutex<ChangeDetector>>,
}

impl CaptureSession {
    pub fn new(
        id: SessionId,
        config: CaptureConfig,
        registry: ExclusionRegistry,
        similarity: Arc<dyn StructuralSimilarity>,
    ) -> Result<Self, ConfigError> {
        let detector = ChangeDetector::new(config.clone(), registry)?.with_similarity(similarity);
        Ok(Self {
            id,
            config,
            detector: Arc::new(Mutex::new(detector)),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// 生成一个可以丢到工作线程上执行的判定任务
    pub fn evaluate_job(&self, frame: Frame) -> impl FnOnce() -> Evaluation + Send + 'static {
        let detector = Arc::clone(&self.detector);
        let frame = Arc::new(frame);
        move || {
            let mut detector = detector.lock().unwrap_or_else(PoisonError::into_inner);
            let checkpoint = detector.checkpoint();
            Evaluation {
                decision: detector.evaluate(frame),
                checkpoint,
            }
        }
    }

    /// 撤销一次不再使用的判定（如超时后才返回的结果）
    pub fn discard(&self, evaluation: Evaluation) {
        self.detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .restore(evaluation.checkpoint);
    }

    pub fn pending_confirmations(&self) -> u32 {
        self.detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending_confirmations()
    }

    pub fn commit(&self, slide: &AcceptedSlide) {
        self.detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .commit(slide);
    }

    pub fn stats(&self) -> ExtractionStats {
        self.detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats()
    }
}

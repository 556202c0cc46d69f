//! 调度器依赖的外部协作方：截帧、持久化、播放器状态
//!
//! 实现方运行在阻塞线程池里，可以放心做同步 IO。

use crate::core::error::{SinkError, SourceError};
use crate::core::video::frame::{Frame, FrameInfo, SessionId};
use crate::core::video::phash::Fingerprint;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub trait FrameSource: Send + Sync {
    /// 返回 `Ok(None)` 表示本轮没有可用画面（如播放器尚未就绪），跳过即可
    fn capture_frame(&self, session_id: &SessionId) -> Result<Option<Frame>, SourceError>;
}

/// 交给持久化协作方的幻灯片元数据
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlideMetadata {
    pub index: u32,
    pub title: String,
    pub fingerprint: String,
    pub frame: FrameInfo,
    pub captured_at: DateTime<Utc>,
}

impl SlideMetadata {
    pub fn new(index: u32, fingerprint: &Fingerprint, frame: &Frame) -> Self {
        Self {
            index,
            title: format!("Slide {}", index),
            fingerprint: fingerprint.to_hex(),
            frame: FrameInfo::from_frame(frame),
            captured_at: Utc::now(),
        }
    }
}

pub trait SlideSink: Send + Sync {
    fn accept_slide(
        &self,
        session_id: &SessionId,
        frame: &Frame,
        metadata: &SlideMetadata,
    ) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackSignals {
    /// 视频已播放到结尾
    pub ended: bool,
    /// 播放器报错
    pub player_error: bool,
}

/// 播放器自动化信号
pub trait PlaybackMonitor: Send + Sync {
    fn signals(&self, session_id: &SessionId) -> PlaybackSignals;

    /// 请求播放器重试（刷新 / 重新加载）
    fn request_retry(&self, session_id: &SessionId) -> Result<(), SourceError> {
        let _ = session_id;
        Ok(())
    }
}

/// 不提供任何信号的监视器
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMonitor;

impl PlaybackMonitor for NoopMonitor {
    fn signals(&self, _session_id: &SessionId) -> PlaybackSignals {
        PlaybackSignals::default()
    }
}

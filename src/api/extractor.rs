//! 单会话幻灯片提取器

use super::models::ExtractedSlide;
use crate::core::config::CaptureConfig;
use crate::core::error::{ConfigError, FrameError};
use crate::core::video::{
    ChangeDetector, Decision, ExclusionRegistry, ExtractionStats, Frame, SessionId, SlideFormat,
};
use log::{info, warn};
use std::sync::{Arc, Mutex, PoisonError};

/// 幻灯片提取器 - 逐帧判定 + 排除列表 + 编码
///
/// 不依赖调度器，适合宿主端自己控制截帧节奏的场景：
///
/// ```ignore
/// let extractor = SlideExtractor::create(CaptureConfig::default())?;
/// if let Some(slide) = extractor.process_frame(w, h, rgba, ts_ms, n)? {
///     save(slide.image_data);
/// }
/// ```
pub struct SlideExtractor {
    detector: Mutex<ChangeDetector>,
    registry: ExclusionRegistry,
    session_id: SessionId,
    format: SlideFormat,
}

impl SlideExtractor {
    /// 使用内置排除项创建提取器
    pub fn create(config: CaptureConfig) -> Result<Self, ConfigError> {
        Self::with_registry(config, ExclusionRegistry::with_defaults())
    }

    pub fn with_registry(
        config: CaptureConfig,
        registry: ExclusionRegistry,
    ) -> Result<Self, ConfigError> {
        crate::init_logging();
        let detector = ChangeDetector::new(config, registry.clone())?;
        info!("🎬 SlideExtractor: created ({} exclusions)", registry.len());
        Ok(Self {
            detector: Mutex::new(detector),
            registry,
            session_id: SessionId::new("local"),
            format: SlideFormat::Jpeg(85),
        })
    }

    pub fn with_format(mut self, format: SlideFormat) -> Self {
        self.format = format;
        self
    }

    pub fn registry(&self) -> &ExclusionRegistry {
        &self.registry
    }

    /// 处理一帧 RGBA 画面，确认为新幻灯片时返回编码后的结果
    ///
    /// 编码失败时不提交参考帧，下一帧仍需重新确认。
    pub fn process_frame(
        &self,
        width: u32,
        height: u32,
        rgba: Vec<u8>,
        timestamp_ms: u64,
        frame_number: u64,
    ) -> Result<Option<ExtractedSlide>, FrameError> {
        let frame = Arc::new(Frame::new(
            self.session_id.clone(),
            width,
            height,
            rgba,
            timestamp_ms,
            frame_number,
        ));

        let mut detector = self.detector.lock().unwrap_or_else(PoisonError::into_inner);
        let slide = match detector.evaluate(frame) {
            Decision::Accepted(slide) => slide,
            _ => return Ok(None),
        };

        let image_data = match slide.frame.encode(self.format) {
            Ok(data) => data,
            Err(e) => {
                warn!("⚠️ 幻灯片 {} 编码失败: {}", slide.index, e);
                return Err(e);
            }
        };
        detector.commit(&slide);

        let frame = &slide.frame;
        Ok(Some(ExtractedSlide {
            index: slide.index,
            title: format!("Slide {}", slide.index),
            fingerprint: slide.fingerprint.to_hex(),
            timestamp_ms: frame.timestamp.as_millis() as u64,
            frame_number: frame.frame_number,
            width: frame.width,
            height: frame.height,
            change_ratio: slide.metrics.change_ratio,
            ssim: slide.metrics.ssim,
            image_data,
        }))
    }

    pub fn stats(&self) -> ExtractionStats {
        self.detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats()
    }

    /// 清除参考帧与计数，开始新的会话
    pub fn reset(&self) {
        self.detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
    }
}

impl Drop for SlideExtractor {
    fn drop(&mut self) {
        info!("🗑️ SlideExtractor: released");
    }
}

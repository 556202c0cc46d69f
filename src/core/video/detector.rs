//! 变化判定引擎
//!
//! 每帧与会话的"最后一次接受的帧"比较：像素差门限 → SSIM → 连续确认 →
//! 指纹排除检查。参考帧只在确认变化后才会前移。

use super::diff_filter::FrameDiffFilter;
use super::exclusion::{ExclusionMatch, ExclusionRegistry};
use super::frame::Frame;
use super::phash::{phash_luma, Fingerprint};
use super::preprocess::{crop, luma_image};
use super::similarity::{GlobalSsim, StructuralSimilarity};
use super::state_machine::{VerificationAction, VerificationConfig, VerificationState};
use crate::core::config::{CaptureConfig, ComparisonMethod};
use crate::core::error::{ConfigError, FrameError};
use image::GrayImage;
use log::{debug, info};
use serde::Serialize;
use std::sync::Arc;

/// 裁剪并预处理后的参考帧
#[derive(Debug)]
pub struct PreparedFrame {
    frame: Arc<Frame>,
    luma: GrayImage,
    smoothed: GrayImage,
}

impl PreparedFrame {
    /// 原始（未裁剪）帧
    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ComparisonMetrics {
    pub change_ratio: Option<f64>,
    pub ssim: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoChangeReason {
    InvalidFrame,
    /// 画面中心全黑，视频还没渲染出来
    BlankFrame,
    BelowDiffThreshold { change_ratio: f64 },
    Similar { ssim: f64 },
}

/// 已确认、未被排除的新幻灯片，交给持久化后再 `commit`
#[derive(Debug, Clone)]
pub struct AcceptedSlide {
    pub frame: Arc<Frame>,
    pub fingerprint: Fingerprint,
    pub metrics: ComparisonMetrics,
    /// 从 1 开始的幻灯片序号
    pub index: u32,
    prepared: Arc<PreparedFrame>,
}

#[derive(Debug, Clone)]
pub enum Decision {
    NoChange(NoChangeReason),
    Pending { confirmations: u32, required: u32 },
    Excluded {
        matched: ExclusionMatch,
        fingerprint: Fingerprint,
    },
    Accepted(AcceptedSlide),
}

impl Decision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Decision::Accepted(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ExtractionStats {
    pub frames_processed: u64,
    pub invalid_frames: u64,
    pub gate_skips: u64,
    pub ssim_evaluations: u64,
    pub candidates: u64,
    pub accepted: u64,
    pub excluded: u64,
}

/// `evaluate` 之前的判定状态，用于撤销被丢弃的判定
#[derive(Debug, Clone)]
pub struct DetectorCheckpoint {
    reference: Option<Arc<PreparedFrame>>,
    state: VerificationState,
    stats: ExtractionStats,
}

pub struct ChangeDetector {
    config: CaptureConfig,
    filter: FrameDiffFilter,
    verification: VerificationConfig,
    similarity: Arc<dyn StructuralSimilarity>,
    registry: ExclusionRegistry,
    reference: Option<Arc<PreparedFrame>>,
    state: VerificationState,
    accepted_count: u32,
    stats: ExtractionStats,
}

impl ChangeDetector {
    pub fn new(config: CaptureConfig, registry: ExclusionRegistry) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            filter: FrameDiffFilter::from_config(&config),
            verification: VerificationConfig::from_config(&config),
            similarity: Arc::new(GlobalSsim),
            registry,
            reference: None,
            state: VerificationState::new(),
            accepted_count: 0,
            stats: ExtractionStats::default(),
            config,
        })
    }

    /// 替换 SSIM 实现
    pub fn with_similarity(mut self, similarity: Arc<dyn StructuralSimilarity>) -> Self {
        self.similarity = similarity;
        self
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn stats(&self) -> ExtractionStats {
        self.stats
    }

    pub fn pending_confirmations(&self) -> u32 {
        self.state.confirmations()
    }

    pub fn reference(&self) -> Option<&Frame> {
        self.reference.as_ref().map(|p| p.frame())
    }

    pub fn accepted_count(&self) -> u32 {
        self.accepted_count
    }

    pub fn checkpoint(&self) -> DetectorCheckpoint {
        DetectorCheckpoint {
            reference: self.reference.clone(),
            state: self.state,
            stats: self.stats,
        }
    }

    /// 回到 `checkpoint` 时的状态；期间不能有 `commit`
    pub fn restore(&mut self, checkpoint: DetectorCheckpoint) {
        self.reference = checkpoint.reference;
        self.state = checkpoint.state;
        self.stats = checkpoint.stats;
    }

    /// 判定一帧，不修改参考帧（被排除时除外）
    pub fn evaluate(&mut self, frame: Arc<Frame>) -> Decision {
        self.stats.frames_processed += 1;

        if let Err(e) = frame.validate() {
            debug!("⚠️ 帧 #{} 无效: {}", frame.frame_number, e);
            self.stats.invalid_frames += 1;
            return Decision::NoChange(NoChangeReason::InvalidFrame);
        }
        if !frame.has_visible_content() {
            debug!("⬛ 帧 #{} 画面全黑，跳过", frame.frame_number);
            self.stats.invalid_frames += 1;
            return Decision::NoChange(NoChangeReason::BlankFrame);
        }

        let prepared = match self.prepare(&frame) {
            Ok(p) => Arc::new(p),
            Err(e) => {
                debug!("⚠️ 帧 #{} 预处理失败: {}", frame.frame_number, e);
                self.stats.invalid_frames += 1;
                return Decision::NoChange(NoChangeReason::InvalidFrame);
            }
        };

        let reference = match &self.reference {
            Some(r) => Arc::clone(r),
            None => {
                debug!("🎬 首帧 #{} 直接确认", frame.frame_number);
                self.state = VerificationState::Idle;
                return self.confirm(prepared, ComparisonMetrics::default());
            }
        };

        let mut metrics = ComparisonMetrics::default();

        let outcome = self.filter.compare(&reference.smoothed, &prepared.smoothed);
        metrics.change_ratio = Some(outcome.change_ratio);
        if self.filter.is_identical(&outcome) {
            self.stats.gate_skips += 1;
            self.state = VerificationState::Idle;
            return Decision::NoChange(NoChangeReason::BelowDiffThreshold {
                change_ratio: outcome.change_ratio,
            });
        }

        if self.config.comparison_method == ComparisonMethod::Default {
            let score = self.similarity.score(&reference.luma, &prepared.luma);
            self.stats.ssim_evaluations += 1;
            metrics.ssim = Some(score);
            if score >= self.config.ssim_threshold {
                debug!(
                    "🔍 帧 #{} ratio={:.4} ssim={:.5} 视为相同",
                    frame.frame_number, outcome.change_ratio, score
                );
                self.state = VerificationState::Idle;
                return Decision::NoChange(NoChangeReason::Similar { ssim: score });
            }
        }

        self.stats.candidates += 1;
        let (next, action) = self.state.transition(true, &self.verification);
        self.state = next;

        match action {
            VerificationAction::Pending {
                confirmations,
                required,
            } => {
                debug!(
                    "🔄 帧 #{} 候选变化 {}/{} (ratio={:.4}, ssim={:?})",
                    frame.frame_number, confirmations, required, outcome.change_ratio, metrics.ssim
                );
                Decision::Pending {
                    confirmations,
                    required,
                }
            }
            VerificationAction::Confirm => self.confirm(prepared, metrics),
            VerificationAction::Hold => Decision::NoChange(NoChangeReason::Similar {
                ssim: metrics.ssim.unwrap_or(1.0),
            }),
        }
    }

    /// 持久化成功后把新幻灯片设为参考帧
    pub fn commit(&mut self, slide: &AcceptedSlide) {
        self.reference = Some(Arc::clone(&slide.prepared));
        self.state = VerificationState::Idle;
        self.accepted_count += 1;
        self.stats.accepted += 1;
        info!(
            "📸 幻灯片 {} 已接受 (帧 #{}, {})",
            slide.index, slide.frame.frame_number, slide.fingerprint
        );
    }

    /// 判定并在接受时立即提交（没有持久化环节的调用方使用）
    pub fn process(&mut self, frame: Arc<Frame>) -> Decision {
        let decision = self.evaluate(frame);
        if let Decision::Accepted(slide) = &decision {
            self.commit(slide);
        }
        decision
    }

    pub fn reset(&mut self) {
        self.reference = None;
        self.state = VerificationState::Idle;
        self.accepted_count = 0;
        self.stats = ExtractionStats::default();
    }

    fn prepare(&self, frame: &Arc<Frame>) -> Result<PreparedFrame, FrameError> {
        let cropped = crop(
            frame,
            self.config.top_crop_percent,
            self.config.bottom_crop_percent,
        )?;
        let luma = luma_image(&cropped)?;
        let smoothed = self.filter.smooth(&luma);
        Ok(PreparedFrame {
            frame: Arc::clone(frame),
            luma,
            smoothed,
        })
    }

    fn confirm(&mut self, prepared: Arc<PreparedFrame>, metrics: ComparisonMetrics) -> Decision {
        // 指纹基于完整画面，与用户从截图添加的排除项保持一致
        let fingerprint = match luma_image(&prepared.frame) {
            Ok(luma) => phash_luma(&luma),
            Err(_) => return Decision::NoChange(NoChangeReason::InvalidFrame),
        };

        if let Some(matched) = self.registry.find_match(
            &fingerprint,
            self.config.hamming_threshold_low,
            self.config.hamming_threshold_up,
        ) {
            info!(
                "🚫 帧 #{} 命中排除项 \"{}\" (distance={})，跳过",
                prepared.frame.frame_number, matched.name, matched.distance
            );
            self.reference = Some(prepared);
            self.stats.excluded += 1;
            return Decision::Excluded {
                matched,
                fingerprint,
            };
        }

        Decision::Accepted(AcceptedSlide {
            frame: Arc::clone(&prepared.frame),
            fingerprint,
            metrics,
            index: self.accepted_count + 1,
            prepared,
        })
    }
}

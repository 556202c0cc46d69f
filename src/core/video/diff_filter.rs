use super::preprocess::{fit_to, gaussian_blur};
use crate::core::config::CaptureConfig;
use image::GrayImage;

/// 像素差比对结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffOutcome {
    pub differing: usize,
    pub total: usize,
    pub change_ratio: f64,
}

/// 像素差门限 - 廉价的第一道过滤
///
/// 两帧亮度逐像素比较，超过 `pixel_threshold` 的像素占比低于
/// `ratio_threshold` 时视为相同，后续的 SSIM 不再计算。
/// 本身不持有参考帧，参考帧由调用方（`ChangeDetector`）管理。
#[derive(Debug, Clone)]
pub struct FrameDiffFilter {
    pixel_threshold: u8,
    ratio_threshold: f64,
    blur_sigma: f32,
}

impl FrameDiffFilter {
    pub fn new(pixel_threshold: u8, ratio_threshold: f64, blur_sigma: f32) -> Self {
        Self {
            pixel_threshold,
            ratio_threshold,
            blur_sigma,
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(
            config.pixel_diff_threshold.min(255) as u8,
            config.change_ratio_threshold,
            config.gaussian_blur_sigma as f32,
        )
    }

    /// 预滤波（可被参考帧缓存复用）
    pub fn smooth(&self, luma: &GrayImage) -> GrayImage {
        gaussian_blur(luma, self.blur_sigma)
    }

    /// 比较两张已预滤波的亮度图，候选图尺寸不同时缩放到参考图尺寸
    pub fn compare(&self, reference: &GrayImage, candidate: &GrayImage) -> DiffOutcome {
        let (w, h) = reference.dimensions();
        let candidate = fit_to(candidate, w, h);

        let threshold = self.pixel_threshold;
        let differing = reference
            .as_raw()
            .iter()
            .zip(candidate.as_raw().iter())
            .filter(|(a, b)| a.abs_diff(**b) > threshold)
            .count();

        let total = reference.as_raw().len();
        let change_ratio = if total == 0 {
            0.0
        } else {
            differing as f64 / total as f64
        };

        DiffOutcome {
            differing,
            total,
            change_ratio,
        }
    }

    pub fn is_identical(&self, outcome: &DiffOutcome) -> bool {
        outcome.change_ratio < self.ratio_threshold
    }
}

impl Default for FrameDiffFilter {
    fn default() -> Self {
        Self::from_config(&CaptureConfig::default())
    }
}

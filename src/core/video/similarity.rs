//! 结构相似度（SSIM）
//!
//! 单窗口全局 SSIM：整张亮度图只算一组均值 / 方差 / 协方差。

use super::frame::Frame;
use super::preprocess::{fit_to, luma_image};
use crate::core::error::FrameError;
use image::GrayImage;

const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

/// 结构相似度评估（比对流程中唯一较贵的阶段，测试中可替换）
pub trait StructuralSimilarity: Send + Sync {
    /// 候选图尺寸与参考图不同时由实现负责对齐
    fn score(&self, reference: &GrayImage, candidate: &GrayImage) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalSsim;

impl StructuralSimilarity for GlobalSsim {
    fn score(&self, reference: &GrayImage, candidate: &GrayImage) -> f64 {
        let (w, h) = reference.dimensions();
        let candidate = fit_to(candidate, w, h);
        global_ssim(reference.as_raw(), candidate.as_raw())
    }
}

fn global_ssim(a: &[u8], b: &[u8]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 1.0;
    }
    let count = n as f64;

    let (sum_a, sum_b) = a[..n]
        .iter()
        .zip(&b[..n])
        .fold((0.0f64, 0.0f64), |(sa, sb), (&x, &y)| (sa + x as f64, sb + y as f64));
    let mean_a = sum_a / count;
    let mean_b = sum_b / count;

    let (mut var_a, mut var_b, mut cov) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a[..n].iter().zip(&b[..n]) {
        let da = x as f64 - mean_a;
        let db = y as f64 - mean_b;
        var_a += da * da;
        var_b += db * db;
        cov += da * db;
    }
    var_a /= count;
    var_b /= count;
    cov /= count;

    let numerator = (2.0 * mean_a * mean_b + C1) * (2.0 * cov + C2);
    let denominator = (mean_a * mean_a + mean_b * mean_b + C1) * (var_a + var_b + C2);
    numerator / denominator
}

/// 两帧的 SSIM，第二帧缩放到第一帧尺寸
pub fn ssim(reference: &Frame, candidate: &Frame) -> Result<f64, FrameError> {
    let a = luma_image(reference)?;
    let b = luma_image(candidate)?;
    Ok(GlobalSsim.score(&a, &b))
}

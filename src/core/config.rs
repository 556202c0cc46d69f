//! 采集配置 - 显式、带校验的配置结构
//!
//! 字段名与宿主应用 JSON 配置保持一致（camelCase）。非法取值在设置时被拒绝，
//! 不会带进比对流程。

use crate::core::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 比对方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonMethod {
    /// 像素差门限 → SSIM
    #[default]
    Default,
    /// 仅像素差门限
    Basic,
}

/// SSIM 阈值预设
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SsimPreset {
    Strict,
    Normal,
    Loose,
}

impl SsimPreset {
    pub fn threshold(self) -> f64 {
        match self {
            SsimPreset::Strict => 0.999,
            SsimPreset::Normal => 0.9987,
            SsimPreset::Loose => 0.998,
        }
    }

    /// 精确匹配预设值，否则视为自定义
    pub fn from_threshold(value: f64) -> Option<Self> {
        [SsimPreset::Strict, SsimPreset::Normal, SsimPreset::Loose]
            .into_iter()
            .find(|p| p.threshold() == value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureConfig {
    pub pixel_diff_threshold: u32,
    pub change_ratio_threshold: f64,
    pub gaussian_blur_sigma: f64,
    pub ssim_threshold: f64,
    pub hamming_threshold_low: u32,
    pub hamming_threshold_up: u32,
    pub enable_double_verification: bool,
    pub verification_count: u32,
    pub comparison_method: ComparisonMethod,
    /// 轮询间隔（秒）
    pub check_interval: f64,
    pub top_crop_percent: f64,
    pub bottom_crop_percent: f64,
    pub auto_detect_end: bool,
    pub auto_retry_error: bool,
    pub max_retry_attempts: u32,
    /// 单次截帧等待上限（秒）
    pub capture_timeout: f64,
    /// 单个比对/哈希任务的超时（秒）
    pub job_timeout: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            pixel_diff_threshold: 30,
            change_ratio_threshold: 0.005,
            gaussian_blur_sigma: 0.5,
            ssim_threshold: 0.999,
            hamming_threshold_low: 0,
            hamming_threshold_up: 5,
            enable_double_verification: true,
            verification_count: 2,
            comparison_method: ComparisonMethod::Default,
            check_interval: 2.0,
            top_crop_percent: 5.0,
            bottom_crop_percent: 5.0,
            auto_detect_end: true,
            auto_retry_error: true,
            max_retry_attempts: 3,
            capture_timeout: 10.0,
            job_timeout: 30.0,
        }
    }
}

fn out_of_range(field: &'static str, value: impl ToString, expected: &'static str) -> ConfigError {
    ConfigError::OutOfRange {
        field,
        value: value.to_string(),
        expected,
    }
}

/// 时长下限 1 毫秒，上限一天
const MIN_SECONDS: Duration = Duration::from_millis(1);
const MAX_SECONDS: Duration = Duration::from_secs(24 * 60 * 60);

fn check_seconds(field: &'static str, value: f64) -> Result<(), ConfigError> {
    match Duration::try_from_secs_f64(value) {
        Ok(d) if (MIN_SECONDS..=MAX_SECONDS).contains(&d) => Ok(()),
        _ => Err(out_of_range(field, value, "0.001..=86400 seconds")),
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pixel_diff_threshold > 255 {
            return Err(out_of_range("pixelDiffThreshold", self.pixel_diff_threshold, "0..=255"));
        }
        if !(0.0..=1.0).contains(&self.change_ratio_threshold) {
            return Err(out_of_range("changeRatioThreshold", self.change_ratio_threshold, "0.0..=1.0"));
        }
        if !self.gaussian_blur_sigma.is_finite() || self.gaussian_blur_sigma < 0.0 {
            return Err(out_of_range("gaussianBlurSigma", self.gaussian_blur_sigma, ">= 0"));
        }
        if !(0.0..=1.0).contains(&self.ssim_threshold) {
            return Err(out_of_range("ssimThreshold", self.ssim_threshold, "0.0..=1.0"));
        }
        if self.hamming_threshold_low > 256 {
            return Err(out_of_range("hammingThresholdLow", self.hamming_threshold_low, "0..=256"));
        }
        if self.hamming_threshold_up > 256 {
            return Err(out_of_range("hammingThresholdUp", self.hamming_threshold_up, "0..=256"));
        }
        if self.hamming_threshold_low > self.hamming_threshold_up {
            return Err(ConfigError::HammingWindow {
                low: self.hamming_threshold_low,
                up: self.hamming_threshold_up,
            });
        }
        if self.verification_count < 1 {
            return Err(out_of_range("verificationCount", self.verification_count, ">= 1"));
        }
        check_seconds("checkInterval", self.check_interval)?;
        check_seconds("captureTimeout", self.capture_timeout)?;
        check_seconds("jobTimeout", self.job_timeout)?;
        if !(0.0..100.0).contains(&self.top_crop_percent) {
            return Err(out_of_range("topCropPercent", self.top_crop_percent, "0..100"));
        }
        if !(0.0..100.0).contains(&self.bottom_crop_percent) {
            return Err(out_of_range("bottomCropPercent", self.bottom_crop_percent, "0..100"));
        }
        let crop_sum = self.top_crop_percent + self.bottom_crop_percent;
        if crop_sum >= 100.0 {
            return Err(ConfigError::CropSum(crop_sum));
        }
        Ok(())
    }

    /// 解析并校验 JSON 配置，缺失字段取默认值
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: CaptureConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn with_ssim_preset(mut self, preset: SsimPreset) -> Self {
        self.ssim_threshold = preset.threshold();
        self
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.check_interval)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.capture_timeout)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.job_timeout)
    }
}

/// 调度器配置
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub worker_threads: usize,
    pub max_concurrent_tasks: usize,
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get().clamp(1, 4),
            max_concurrent_tasks: 4,
            event_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CaptureConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.check_interval(), Duration::from_secs(2));
        assert_eq!(config.job_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let cases: Vec<Box<dyn Fn(&mut CaptureConfig)>> = vec![
            Box::new(|c| c.pixel_diff_threshold = 300),
            Box::new(|c| c.change_ratio_threshold = 1.5),
            Box::new(|c| c.gaussian_blur_sigma = -0.1),
            Box::new(|c| c.ssim_threshold = 1.01),
            Box::new(|c| c.hamming_threshold_up = 257),
            Box::new(|c| c.verification_count = 0),
            Box::new(|c| c.check_interval = 0.0),
            Box::new(|c| c.job_timeout = f64::NAN),
            Box::new(|c| c.check_interval = 1e-12),
            Box::new(|c| c.check_interval = -1.0),
            Box::new(|c| c.capture_timeout = 1e30),
            Box::new(|c| c.job_timeout = f64::INFINITY),
            Box::new(|c| c.top_crop_percent = 100.0),
        ];

        for mutate in cases {
            let mut config = CaptureConfig::default();
            mutate(&mut config);
            assert!(
                matches!(config.validate(), Err(ConfigError::OutOfRange { .. })),
                "expected rejection for {:?}",
                config
            );
        }
    }

    #[test]
    fn test_duration_bounds() {
        let config = CaptureConfig {
            check_interval: 0.005,
            capture_timeout: 86400.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert!(config.check_interval() >= Duration::from_millis(4));

        let err = CaptureConfig::from_json_str(r#"{ "checkInterval": 1e-12 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "checkInterval", .. }));
        let err = CaptureConfig::from_json_str(r#"{ "jobTimeout": 1e30 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "jobTimeout", .. }));
    }

    #[test]
    fn test_hamming_window_and_crop_sum() {
        let config = CaptureConfig {
            hamming_threshold_low: 6,
            hamming_threshold_up: 5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::HammingWindow { low: 6, up: 5 })
        ));

        let config = CaptureConfig {
            top_crop_percent: 60.0,
            bottom_crop_percent: 40.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::CropSum(_))));
    }

    #[test]
    fn test_json_uses_camel_case_and_defaults() {
        let config = CaptureConfig::from_json_str(
            r#"{ "pixelDiffThreshold": 20, "ssimThreshold": 0.998, "comparisonMethod": "basic" }"#,
        )
        .unwrap();

        assert_eq!(config.pixel_diff_threshold, 20);
        assert_eq!(config.ssim_threshold, 0.998);
        assert_eq!(config.comparison_method, ComparisonMethod::Basic);
        assert_eq!(config.verification_count, 2);
    }

    #[test]
    fn test_json_invalid_value_rejected() {
        let err = CaptureConfig::from_json_str(r#"{ "verificationCount": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "verificationCount", .. }));

        let err = CaptureConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_ssim_presets() {
        assert_eq!(SsimPreset::Normal.threshold(), 0.9987);
        assert_eq!(SsimPreset::from_threshold(0.998), Some(SsimPreset::Loose));
        assert_eq!(SsimPreset::from_threshold(0.95), None);

        let config = CaptureConfig::default().with_ssim_preset(SsimPreset::Loose);
        assert_eq!(config.ssim_threshold, 0.998);
    }
}

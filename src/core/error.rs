use std::time::Duration;
use thiserror::Error;

/// 帧数据错误（预处理阶段快速失败）
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("Frame has zero dimension: {width}x{height}")]
    EmptyDimensions { width: u32, height: u32 },
    #[error("Frame buffer length {actual} does not match {width}x{height} RGBA ({expected} bytes)")]
    BufferMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("Invalid resize target: {width}x{height}")]
    InvalidTarget { width: u32, height: u32 },
    #[error("Invalid crop percentages: top={top}%, bottom={bottom}%")]
    InvalidCrop { top: f64, bottom: f64 },
    #[error("Image encode error: {0}")]
    Encode(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FingerprintError {
    #[error("Fingerprint must be exactly 64 hex characters (256 bits), got {0}")]
    InvalidLength(usize),
    #[error("Fingerprint contains non-hex characters: {0}")]
    InvalidHex(String),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} out of range: {value} (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("hammingThresholdLow ({low}) must not exceed hammingThresholdUp ({up})")]
    HammingWindow { low: u32, up: u32 },
    #[error("topCropPercent + bottomCropPercent must be < 100, got {0}")]
    CropSum(f64),
    #[error("Config parse error: {0}")]
    Parse(String),
    #[error("Config IO error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e.to_string())
    }
}

/// 排除列表错误
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Exclusion name must not be empty")]
    EmptyName,
    #[error("Exclusion name already exists: {0}")]
    DuplicateName(String),
    #[error("Exclusion store IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Exclusion store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 工作线程池错误
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WorkerError {
    #[error("Worker job timed out after {0:?}")]
    Timeout(Duration),
    #[error("Worker job dropped before completion (panicked?)")]
    Dropped,
    #[error("Failed to build worker pool: {0}")]
    Build(String),
}

/// 帧采集协作方错误
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SourceError {
    #[error("Frame capture timed out")]
    Timeout,
    #[error("Frame capture failed: {0}")]
    Failed(String),
}

/// 持久化协作方错误
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SinkError {
    #[error("Slide persistence timed out")]
    Timeout,
    #[error("Slide persistence failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid task config: {0}")]
    Config(#[from] ConfigError),
    #[error("Session {0} already has an active task")]
    DuplicateSession(String),
    #[error("Worker pool error: {0}")]
    Worker(#[from] WorkerError),
    #[error("Scheduler must be used inside a tokio runtime")]
    NoRuntime,
}

use serde::Serialize;

/// 单帧提取器确认的新幻灯片
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedSlide {
    pub index: u32,
    pub title: String,
    /// 64 位十六进制 pHash
    pub fingerprint: String,
    pub timestamp_ms: u64,
    pub frame_number: u64,
    pub width: u32,
    pub height: u32,
    pub change_ratio: Option<f64>,
    pub ssim: Option<f64>,
    #[serde(skip)]
    pub image_data: Vec<u8>,
}

/// 整理报告中的一项（供宿主端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum RemovalReason {
    Duplicate { duplicate_of: usize, distance: u32 },
    Excluded { name: String, distance: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalItem {
    pub index: usize,
    pub reason: RemovalReason,
}

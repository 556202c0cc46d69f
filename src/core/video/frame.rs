use crate::core::error::FrameError;
use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Rgba};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::time::Duration;

/// 会话标识（一个视频目标对应一个会话）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// 帧数据结构
#[derive(Debug, Clone)]
pub struct Frame {
    pub session_id: SessionId,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>, // RGBA 格式
    pub timestamp: Duration,
    pub frame_number: u64,
}

/// 幻灯片编码格式（供持久化协作方使用）
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlideFormat {
    Png,
    Jpeg(u8),
}

impl Frame {
    pub fn new(
        session_id: SessionId,
        width: u32,
        height: u32,
        data: Vec<u8>,
        timestamp_ms: u64,
        frame_number: u64,
    ) -> Self {
        Self {
            session_id,
            width,
            height,
            data,
            timestamp: Duration::from_millis(timestamp_ms),
            frame_number,
        }
    }

    /// 用相同元数据包装新的像素数据
    pub fn with_pixels(&self, width: u32, height: u32, data: Vec<u8>) -> Frame {
        Frame {
            session_id: self.session_id.clone(),
            width,
            height,
            data,
            timestamp: self.timestamp,
            frame_number: self.frame_number,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn validate(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::EmptyDimensions {
                width: self.width,
                height: self.height,
            });
        }
        let expected = self.pixel_count() * 4;
        if self.data.len() != expected {
            return Err(FrameError::BufferMismatch {
                width: self.width,
                height: self.height,
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// 借用像素数据的 image 视图
    pub fn view(&self) -> Result<ImageBuffer<Rgba<u8>, &[u8]>, FrameError> {
        self.validate()?;
        ImageBuffer::from_raw(self.width, self.height, self.data.as_slice()).ok_or(
            FrameError::BufferMismatch {
                width: self.width,
                height: self.height,
                expected: self.pixel_count() * 4,
                actual: self.data.len(),
            },
        )
    }

    /// 检查画面中心区域是否有非黑像素
    ///
    /// 视频尚未渲染时截到的是全黑画面，这种帧按采集失败处理。
    /// 以中心为原点、步长 10 像素采样，最多 100 个点。
    pub fn has_visible_content(&self) -> bool {
        if self.validate().is_err() {
            return false;
        }

        const STEP: i64 = 10;
        const MAX_SAMPLES: usize = 100;

        let w = self.width as i64;
        let h = self.height as i64;
        let cx = w / 2;
        let cy = h / 2;
        let radius = (w.min(h) / 4).min(50);

        let mut samples = 0usize;
        let mut dy = -radius;
        while dy <= radius && samples < MAX_SAMPLES {
            let mut dx = -radius;
            while dx <= radius && samples < MAX_SAMPLES {
                let (x, y) = (cx + dx, cy + dy);
                if x >= 0 && x < w && y >= 0 && y < h {
                    let idx = ((y * w + x) * 4) as usize;
                    samples += 1;
                    if self.data[idx] > 0 || self.data[idx + 1] > 0 || self.data[idx + 2] > 0 {
                        return true;
                    }
                }
                dx += STEP;
            }
            dy += STEP;
        }

        false
    }

    pub fn encode(&self, format: SlideFormat) -> Result<Vec<u8>, FrameError> {
        self.validate()?;
        let rgba = image::RgbaImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| FrameError::Encode("invalid RGBA buffer".to_string()))?;

        let (img, output) = match format {
            SlideFormat::Png => (DynamicImage::ImageRgba8(rgba), ImageOutputFormat::Png),
            // JPEG 不支持 alpha
            SlideFormat::Jpeg(quality) => (
                DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(rgba).to_rgb8()),
                ImageOutputFormat::Jpeg(quality),
            ),
        };

        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, output)
            .map_err(|e| FrameError::Encode(e.to_string()))?;
        Ok(buffer.into_inner())
    }
}

/// 帧元数据（轻量级，用于传递信息）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub session_id: SessionId,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: u64,
    pub frame_number: u64,
}

impl FrameInfo {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            session_id: frame.session_id.clone(),
            width: frame.width,
            height: frame.height,
            timestamp_ms: frame.timestamp.as_millis() as u64,
            frame_number: frame.frame_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, fill: u8) -> Frame {
        let data = vec![fill; (width * height * 4) as usize];
        Frame::new(SessionId::new("s1"), width, height, data, 1000, 30)
    }

    #[test]
    fn test_frame_creation() {
        let frame = solid(100, 100, 255);

        assert_eq!(frame.width, 100);
        assert_eq!(frame.height, 100);
        assert_eq!(frame.pixel_count(), 10000);
        assert_eq!(frame.timestamp.as_millis(), 1000);
        assert_eq!(frame.frame_number, 30);
        assert_eq!(frame.session_id.as_str(), "s1");
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn test_invalid_frames_rejected() {
        let empty = Frame::new(SessionId::new("s1"), 0, 10, vec![], 0, 0);
        assert!(matches!(
            empty.validate(),
            Err(FrameError::EmptyDimensions { .. })
        ));

        let short = Frame::new(SessionId::new("s1"), 4, 4, vec![0; 10], 0, 0);
        assert!(matches!(
            short.validate(),
            Err(FrameError::BufferMismatch { expected: 64, actual: 10, .. })
        ));
        assert!(short.view().is_err());
    }

    #[test]
    fn test_black_frame_has_no_content() {
        let mut black = solid(200, 200, 0);
        // alpha 通道不参与判断
        for px in black.data.chunks_exact_mut(4) {
            px[3] = 255;
        }
        assert!(!black.has_visible_content());
        assert!(solid(200, 200, 40).has_visible_content());
    }

    #[test]
    fn test_tiny_frame_content_check() {
        assert!(solid(1, 1, 9).has_visible_content());
        assert!(!solid(1, 1, 0).has_visible_content());
    }

    #[test]
    fn test_encode_png_and_jpeg() {
        let frame = solid(16, 16, 128);
        let png = frame.encode(SlideFormat::Png).unwrap();
        assert_eq!(&png[1..4], b"PNG");

        let jpeg = frame.encode(SlideFormat::Jpeg(80)).unwrap();
        assert_eq!(&jpeg[0..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_frame_info() {
        let info = FrameInfo::from_frame(&solid(10, 20, 1));
        assert_eq!(info.width, 10);
        assert_eq!(info.height, 20);
        assert_eq!(info.timestamp_ms, 1000);
        assert_eq!(info.frame_number, 30);
    }
}

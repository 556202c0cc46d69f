//! 像素预处理 - 灰度 / 缩放 / 裁剪
//!
//! 全部为纯函数，不持有共享可变状态。

use super::frame::Frame;
use crate::core::error::FrameError;
use image::imageops::{self, FilterType};
use image::GrayImage;
use std::borrow::Cow;

/// 整数化的 BT.601 亮度，四舍五入
#[inline]
pub fn luma_of(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114 + 500) / 1000) as u8
}

/// 转为灰度帧（RGB 三通道写入亮度，alpha 保留）
pub fn to_grayscale(frame: &Frame) -> Result<Frame, FrameError> {
    frame.validate()?;
    let mut data = frame.data.clone();
    for px in data.chunks_exact_mut(4) {
        let gray = luma_of(px[0], px[1], px[2]);
        px[0] = gray;
        px[1] = gray;
        px[2] = gray;
    }
    Ok(frame.with_pixels(frame.width, frame.height, data))
}

/// 双线性缩放
pub fn resize(frame: &Frame, width: u32, height: u32) -> Result<Frame, FrameError> {
    if width == 0 || height == 0 {
        return Err(FrameError::InvalidTarget { width, height });
    }
    let view = frame.view()?;
    if frame.width == width && frame.height == height {
        return Ok(frame.clone());
    }
    let resized = imageops::resize(&view, width, height, FilterType::Triangle);
    Ok(frame.with_pixels(width, height, resized.into_raw()))
}

/// 按百分比裁掉顶部和底部（如播放器标题栏、进度条），结果至少保留 1 行
pub fn crop(frame: &Frame, top_percent: f64, bottom_percent: f64) -> Result<Frame, FrameError> {
    frame.validate()?;
    let valid = |p: f64| p.is_finite() && (0.0..=100.0).contains(&p);
    if !valid(top_percent) || !valid(bottom_percent) {
        return Err(FrameError::InvalidCrop {
            top: top_percent,
            bottom: bottom_percent,
        });
    }

    let h = frame.height as usize;
    let row_bytes = frame.width as usize * 4;

    let top_rows = (h as f64 * top_percent / 100.0).floor() as usize;
    let bottom_rows = (h as f64 * bottom_percent / 100.0).floor() as usize;

    let (start, new_h) = if top_rows + bottom_rows >= h {
        (top_rows.min(h - 1), 1)
    } else {
        (top_rows, h - top_rows - bottom_rows)
    };

    let data = frame.data[start * row_bytes..(start + new_h) * row_bytes].to_vec();
    Ok(frame.with_pixels(frame.width, new_h as u32, data))
}

/// 单通道亮度图
pub fn luma_image(frame: &Frame) -> Result<GrayImage, FrameError> {
    frame.validate()?;
    let gray: Vec<u8> = frame
        .data
        .chunks_exact(4)
        .map(|px| luma_of(px[0], px[1], px[2]))
        .collect();
    GrayImage::from_raw(frame.width, frame.height, gray).ok_or(FrameError::BufferMismatch {
        width: frame.width,
        height: frame.height,
        expected: frame.pixel_count(),
        actual: frame.data.len() / 4,
    })
}

/// 高斯模糊预滤波，sigma <= 0 时不处理
pub fn gaussian_blur(gray: &GrayImage, sigma: f32) -> GrayImage {
    if sigma > 0.0 && sigma.is_finite() {
        imageops::blur(gray, sigma)
    } else {
        gray.clone()
    }
}

/// 尺寸不一致时把 `image` 缩放到目标尺寸
pub fn fit_to(image: &GrayImage, width: u32, height: u32) -> Cow<'_, GrayImage> {
    if image.dimensions() == (width, height) {
        Cow::Borrowed(image)
    } else {
        Cow::Owned(imageops::resize(image, width, height, FilterType::Triangle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::video::frame::SessionId;

    fn frame_from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> [u8; 4]) -> Frame {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y));
            }
        }
        Frame::new(SessionId::new("pre"), width, height, data, 0, 0)
    }

    #[test]
    fn test_luma_weights() {
        assert_eq!(luma_of(0, 0, 0), 0);
        assert_eq!(luma_of(255, 255, 255), 255);
        assert_eq!(luma_of(255, 0, 0), 76); // 76.245
        assert_eq!(luma_of(0, 255, 0), 150); // 149.685
        assert_eq!(luma_of(0, 0, 255), 29); // 29.07
    }

    #[test]
    fn test_grayscale_preserves_alpha() {
        let frame = frame_from_fn(4, 4, |x, _| [200, 100, 50, (x * 60) as u8]);
        let gray = to_grayscale(&frame).unwrap();

        let expected = luma_of(200, 100, 50);
        for (i, px) in gray.data.chunks_exact(4).enumerate() {
            assert_eq!(&px[..3], &[expected, expected, expected]);
            assert_eq!(px[3], frame.data[i * 4 + 3]);
        }
    }

    #[test]
    fn test_grayscale_is_deterministic() {
        let frame = frame_from_fn(8, 8, |x, y| [(x * 30) as u8, (y * 20) as u8, 7, 255]);
        assert_eq!(
            to_grayscale(&frame).unwrap().data,
            to_grayscale(&frame).unwrap().data
        );
    }

    #[test]
    fn test_resize_dimensions_and_stability() {
        let frame = frame_from_fn(100, 60, |x, y| [(x % 256) as u8, (y % 256) as u8, 0, 255]);
        let a = resize(&frame, 32, 32).unwrap();
        let b = resize(&frame, 32, 32).unwrap();

        assert_eq!(a.width, 32);
        assert_eq!(a.height, 32);
        assert_eq!(a.data.len(), 32 * 32 * 4);
        assert_eq!(a.data, b.data);
        assert_eq!(a.session_id, frame.session_id);
    }

    #[test]
    fn test_resize_rejects_zero_target() {
        let frame = frame_from_fn(4, 4, |_, _| [1, 2, 3, 4]);
        assert!(matches!(
            resize(&frame, 0, 4),
            Err(FrameError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_crop_removes_rows() {
        // 每行的 R 通道等于行号
        let frame = frame_from_fn(3, 100, |_, y| [y as u8, 0, 0, 255]);
        let cropped = crop(&frame, 5.0, 10.0).unwrap();

        assert_eq!(cropped.width, 3);
        assert_eq!(cropped.height, 85);
        assert_eq!(cropped.data[0], 5);
        assert_eq!(cropped.data[cropped.data.len() - 4], 89);
    }

    #[test]
    fn test_crop_clamps_to_one_row() {
        let frame = frame_from_fn(2, 10, |_, y| [y as u8, 0, 0, 255]);
        let cropped = crop(&frame, 60.0, 60.0).unwrap();
        assert_eq!(cropped.height, 1);
        assert_eq!(cropped.data[0], 6);

        let all = crop(&frame, 100.0, 0.0).unwrap();
        assert_eq!(all.height, 1);
        assert_eq!(all.data[0], 9);
    }

    #[test]
    fn test_crop_rejects_bad_percent() {
        let frame = frame_from_fn(2, 2, |_, _| [0, 0, 0, 255]);
        assert!(crop(&frame, -1.0, 0.0).is_err());
        assert!(crop(&frame, 0.0, f64::NAN).is_err());
    }

    #[test]
    fn test_blur_disabled_with_zero_sigma() {
        let frame = frame_from_fn(8, 8, |x, _| if x < 4 { [0, 0, 0, 255] } else { [255, 255, 255, 255] });
        let gray = luma_image(&frame).unwrap();
        assert_eq!(gaussian_blur(&gray, 0.0), gray);
        assert_ne!(gaussian_blur(&gray, 1.0), gray);
    }

    #[test]
    fn test_fit_to_borrows_when_equal() {
        let gray = GrayImage::new(10, 10);
        assert!(matches!(fit_to(&gray, 10, 10), Cow::Borrowed(_)));
        assert_eq!(fit_to(&gray, 5, 4).dimensions(), (5, 4));
    }
}

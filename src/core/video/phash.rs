//! 256 位感知哈希（pHash）
//!
//! 灰度 → 64×64 → 二维 DCT-II → 取左上 16×16 低频块 → 去掉直流分量 →
//! 以 255 个交流系数的中位数为界生成比特位。
//!
//! 比特按 u 外层 / v 内层的扫描顺序高位在前写入，只有 255 位有效，
//! 所以十六进制串的最高位恒为 0（与已有的排除列表数据保持兼容）。

use super::frame::Frame;
use super::preprocess::luma_image;
use crate::core::error::FingerprintError;
use image::imageops::{self, FilterType};
use image::GrayImage;
use once_cell::sync::Lazy;
use rustdct::{Dct2, DctPlanner, TransformType2And3};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

const HASH_SIDE: usize = 16;
const DCT_SIDE: usize = HASH_SIDE * 4;
pub const FINGERPRINT_BITS: u32 = 256;
const HEX_LEN: usize = 64;

static HASHER: Lazy<PerceptualHasher> = Lazy::new(PerceptualHasher::new);

/// 256 位指纹，大端存储
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn hamming_distance(&self, other: &Fingerprint) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    /// 第 `pos` 位（从最低位数起）置 1
    fn set_bit(&mut self, pos: usize) {
        let byte = 31 - pos / 8;
        self.0[byte] |= 1 << (pos % 8);
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HEX_LEN {
            return Err(FingerprintError::InvalidLength(s.len()));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| FingerprintError::InvalidHex(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 十六进制指纹的汉明距离，长度不是 64 时报错而不是返回 0
pub fn hamming_distance_hex(a: &str, b: &str) -> Result<u32, FingerprintError> {
    let a: Fingerprint = a.parse()?;
    let b: Fingerprint = b.parse()?;
    Ok(a.hamming_distance(&b))
}

pub fn phash(frame: &Frame) -> Result<Fingerprint, FingerprintError> {
    let luma = luma_image(frame)?;
    Ok(HASHER.hash(&luma))
}

/// 对已转好的亮度图计算指纹
pub fn phash_luma(luma: &GrayImage) -> Fingerprint {
    HASHER.hash(luma)
}

struct PerceptualHasher {
    dct: Arc<dyn TransformType2And3<f64>>,
}

impl PerceptualHasher {
    fn new() -> Self {
        let mut planner = DctPlanner::new();
        Self {
            dct: planner.plan_dct2(DCT_SIDE),
        }
    }

    fn hash(&self, luma: &GrayImage) -> Fingerprint {
        let coeffs = self.coefficients(luma);

        let mut block = Vec::with_capacity(HASH_SIDE * HASH_SIDE);
        for u in 0..HASH_SIDE {
            for v in 0..HASH_SIDE {
                block.push(coeffs[u * DCT_SIDE + v]);
            }
        }

        // 浮点噪声归零，保证常量图的交流系数全部相等
        let eps = 1e-9 * (1.0 + block[0].abs());
        let ac: Vec<f64> = block[1..]
            .iter()
            .map(|&c| if c.abs() < eps { 0.0 } else { c })
            .collect();

        let median = median(&ac);
        let mut fingerprint = Fingerprint([0u8; 32]);
        let top = ac.len() - 1;
        for (i, &c) in ac.iter().enumerate() {
            if c >= median {
                fingerprint.set_bit(top - i);
            }
        }
        fingerprint
    }

    /// 二维 DCT-II，返回按 `u * 64 + v` 排列的系数（u 对应水平方向）
    fn coefficients(&self, luma: &GrayImage) -> Vec<f64> {
        let n = DCT_SIDE;
        let resized = imageops::resize(luma, n as u32, n as u32, FilterType::Triangle);

        // rows[y][x] → 沿 x 变换得到 rows[y][u]
        let mut rows: Vec<f64> = resized.as_raw().iter().map(|&p| p as f64).collect();
        for row in rows.chunks_exact_mut(n) {
            self.dct.process_dct2(row);
        }

        // 转置为 cols[u][y] 再沿 y 变换得到 cols[u][v]
        let mut cols = vec![0.0f64; n * n];
        for y in 0..n {
            for u in 0..n {
                cols[u * n + y] = rows[y * n + u];
            }
        }
        for col in cols.chunks_exact_mut(n) {
            self.dct.process_dct2(col);
        }

        let scale = 2.0 / n as f64;
        let c0 = std::f64::consts::FRAC_1_SQRT_2;
        for u in 0..n {
            let cu = if u == 0 { c0 } else { 1.0 };
            for v in 0..n {
                let cv = if v == 0 { c0 } else { 1.0 };
                cols[u * n + v] *= scale * cu * cv;
            }
        }
        cols
    }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

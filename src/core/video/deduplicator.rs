//! 采集结束后的整理：重复幻灯片 + 排除列表
//!
//! 只产出报告，删除由调用方完成。

use super::exclusion::{find_in, ExclusionMatch, ExclusionRegistry};
use super::frame::Frame;
use super::phash::{phash, Fingerprint};
use log::{debug, info};
use rayon::prelude::*;

#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateSlide {
    pub index: usize,
    /// 保留的那一张
    pub duplicate_of: usize,
    pub distance: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExcludedSlide {
    pub index: usize,
    pub matched: ExclusionMatch,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupReport {
    /// 与输入一一对应，无法计算时为 None
    pub fingerprints: Vec<Option<Fingerprint>>,
    pub duplicates: Vec<DuplicateSlide>,
    pub excluded: Vec<ExcludedSlide>,
    pub failed: Vec<usize>,
}

impl DedupReport {
    /// 需要删除的序号（升序、去重）
    pub fn removable(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .duplicates
            .iter()
            .map(|d| d.index)
            .chain(self.excluded.iter().map(|e| e.index))
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    pub fn kept(&self) -> Vec<usize> {
        let removable = self.removable();
        (0..self.fingerprints.len())
            .filter(|i| removable.binary_search(i).is_err())
            .collect()
    }
}

pub struct SlideDeduplicator {
    threshold: u32,
    remove_duplicates: bool,
    registry: Option<ExclusionRegistry>,
}

impl SlideDeduplicator {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            remove_duplicates: true,
            registry: None,
        }
    }

    pub fn with_registry(mut self, registry: ExclusionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 关闭第一阶段（只做排除检查）
    pub fn without_duplicate_removal(mut self) -> Self {
        self.remove_duplicates = false;
        self
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// 并行计算指纹后依次执行两个阶段
    pub fn analyze(&self, slides: &[Frame]) -> DedupReport {
        let fingerprints: Vec<Option<Fingerprint>> = slides
            .par_iter()
            .map(|frame| match phash(frame) {
                Ok(fp) => Some(fp),
                Err(e) => {
                    debug!("⚠️ 幻灯片 #{} 指纹计算失败: {}", frame.frame_number, e);
                    None
                }
            })
            .collect();

        self.analyze_fingerprints(fingerprints)
    }

    pub fn analyze_fingerprints(&self, fingerprints: Vec<Option<Fingerprint>>) -> DedupReport {
        let mut report = DedupReport {
            failed: fingerprints
                .iter()
                .enumerate()
                .filter(|(_, fp)| fp.is_none())
                .map(|(i, _)| i)
                .collect(),
            ..Default::default()
        };

        if self.remove_duplicates {
            report.duplicates = self.find_duplicates(&fingerprints);
        }

        if let Some(registry) = &self.registry {
            let snapshot = registry.snapshot();
            report.excluded = fingerprints
                .iter()
                .enumerate()
                .filter(|(i, _)| !report.duplicates.iter().any(|d| d.index == *i))
                .filter_map(|(i, fp)| fp.as_ref().map(|fp| (i, fp)))
                .filter_map(|(index, fp)| {
                    find_in(&snapshot, fp, 0, self.threshold)
                        .map(|matched| ExcludedSlide { index, matched })
                })
                .collect();
        }

        info!(
            "🧹 整理完成: {} 张, 重复 {}, 排除 {}, 失败 {}",
            fingerprints.len(),
            report.duplicates.len(),
            report.excluded.len(),
            report.failed.len()
        );

        report.fingerprints = fingerprints;
        report
    }

    /// 与之前保留的每一张比较，命中第一张即视为重复
    fn find_duplicates(&self, fingerprints: &[Option<Fingerprint>]) -> Vec<DuplicateSlide> {
        let mut kept: Vec<(usize, Fingerprint)> = Vec::new();
        let mut duplicates = Vec::new();

        for (index, fp) in fingerprints.iter().enumerate() {
            let Some(fp) = fp else { continue };

            let hit = kept
                .iter()
                .map(|(i, seen)| (*i, seen.hamming_distance(fp)))
                .find(|(_, d)| *d <= self.threshold);

            match hit {
                Some((duplicate_of, distance)) => {
                    debug!("♻️ 幻灯片 {} 与 {} 重复 (distance={})", index, duplicate_of, distance);
                    duplicates.push(DuplicateSlide {
                        index,
                        duplicate_of,
                        distance,
                    });
                }
                None => kept.push((index, *fp)),
            }
        }

        duplicates
    }
}

impl Default for SlideDeduplicator {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::video::frame::SessionId;

    fn fp_with_low_bits(bits: u32) -> Fingerprint {
        let mut bytes = [0u8; 32];
        for pos in 0..bits as usize {
            bytes[31 - pos / 8] |= 1 << (pos % 8);
        }
        Fingerprint::from_bytes(bytes)
    }

    fn fp_with_high_bits(bits: u32) -> Fingerprint {
        let mut bytes = [0u8; 32];
        for pos in 0..bits as usize {
            bytes[pos / 8] |= 0x80 >> (pos % 8);
        }
        Fingerprint::from_bytes(bytes)
    }

    #[test]
    fn test_duplicates_keep_first_occurrence() {
        let dedup = SlideDeduplicator::new(10);
        let report = dedup.analyze_fingerprints(vec![
            Some(fp_with_low_bits(0)),
            Some(fp_with_high_bits(40)),
            Some(fp_with_low_bits(4)),
            None,
            Some(fp_with_high_bits(45)),
        ]);

        assert_eq!(
            report.duplicates,
            vec![
                DuplicateSlide { index: 2, duplicate_of: 0, distance: 4 },
                DuplicateSlide { index: 4, duplicate_of: 1, distance: 5 },
            ]
        );
        assert_eq!(report.failed, vec![3]);
        assert_eq!(report.kept(), vec![0, 1, 3]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let dedup = SlideDeduplicator::new(10);
        let report = dedup.analyze_fingerprints(vec![
            Some(fp_with_low_bits(0)),
            Some(fp_with_low_bits(10)),
            Some(fp_with_high_bits(11)),
        ]);
        assert_eq!(report.removable(), vec![1]);
    }

    #[test]
    fn test_exclusion_phase_skips_duplicates() {
        let registry = ExclusionRegistry::empty();
        registry.add("intro", fp_with_low_bits(2)).unwrap();

        let dedup = SlideDeduplicator::new(10).with_registry(registry);
        let report = dedup.analyze_fingerprints(vec![
            Some(fp_with_low_bits(0)),
            Some(fp_with_low_bits(1)),
            Some(fp_with_high_bits(60)),
        ]);

        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(report.excluded.len(), 1);
        assert_eq!(report.excluded[0].index, 0);
        assert_eq!(report.excluded[0].matched.name, "intro");
        assert_eq!(report.removable(), vec![0, 1]);
        assert_eq!(report.kept(), vec![2]);
    }

    #[test]
    fn test_without_duplicate_removal() {
        let dedup = SlideDeduplicator::new(10).without_duplicate_removal();
        let report = dedup.analyze_fingerprints(vec![Some(fp_with_low_bits(0)), Some(fp_with_low_bits(0))]);
        assert!(report.duplicates.is_empty());
        assert!(report.removable().is_empty());
    }

    #[test]
    fn test_analyze_frames_in_parallel() {
        let make = |shift: u32| {
            let mut data = Vec::with_capacity(64 * 64 * 4);
            for y in 0..64u32 {
                for x in 0..64u32 {
                    let v = if (x + shift) % 16 < 8 { 40 } else { 200 };
                    let v = if y < 20 { v } else { 120 };
                    data.extend_from_slice(&[v, v, v, 255]);
                }
            }
            Frame::new(SessionId::new("post"), 64, 64, data, 0, shift as u64)
        };
        let bad = Frame::new(SessionId::new("post"), 4, 4, vec![0; 3], 0, 99);

        let slides = vec![make(0), make(0), bad];
        let report = SlideDeduplicator::default().analyze(&slides);

        assert_eq!(report.fingerprints.len(), 3);
        assert_eq!(report.failed, vec![2]);
        assert_eq!(report.duplicates[0].index, 1);
        assert_eq!(report.duplicates[0].distance, 0);
    }
}

//! 指纹工具：计算 pHash、汉明距离、批量整理

use super::models::{RemovalItem, RemovalReason};
use crate::core::error::FingerprintError;
use crate::core::video::deduplicator::SlideDeduplicator;
use crate::core::video::{ExclusionRegistry, Fingerprint, Frame, SessionId};

/// 计算一帧 RGBA 画面的 pHash（64 位十六进制）
pub fn calculate_phash(width: u32, height: u32, rgba: Vec<u8>) -> Result<String, FingerprintError> {
    let frame = Frame::new(SessionId::new("local"), width, height, rgba, 0, 0);
    Ok(crate::core::video::phash(&frame)?.to_hex())
}

pub fn hamming_distance(a: &str, b: &str) -> Result<u32, FingerprintError> {
    crate::core::video::hamming_distance_hex(a, b)
}

/// 对一次采集得到的幻灯片指纹做整理，返回应删除的序号及原因
///
/// 无法解析的指纹按缺失处理，不参与比较。
pub fn find_removable(
    fingerprints: &[String],
    threshold: u32,
    registry: Option<&ExclusionRegistry>,
) -> Vec<RemovalItem> {
    let parsed: Vec<Option<Fingerprint>> = fingerprints.iter().map(|s| s.parse().ok()).collect();

    let mut dedup = SlideDeduplicator::new(threshold);
    if let Some(registry) = registry {
        dedup = dedup.with_registry(registry.clone());
    }
    let report = dedup.analyze_fingerprints(parsed);

    let mut items: Vec<RemovalItem> = report
        .duplicates
        .into_iter()
        .map(|d| RemovalItem {
            index: d.index,
            reason: RemovalReason::Duplicate {
                duplicate_of: d.duplicate_of,
                distance: d.distance,
            },
        })
        .chain(report.excluded.into_iter().map(|e| RemovalItem {
            index: e.index,
            reason: RemovalReason::Excluded {
                name: e.matched.name,
                distance: e.matched.distance,
            },
        }))
        .collect();
    items.sort_by_key(|item| item.index);
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_phash_uniform() {
        let hex = calculate_phash(16, 16, vec![90; 16 * 16 * 4]).unwrap();
        assert_eq!(hex, format!("7{}", "f".repeat(63)));
    }

    #[test]
    fn test_calculate_phash_rejects_bad_buffer() {
        assert!(matches!(
            calculate_phash(16, 16, vec![0; 3]),
            Err(FingerprintError::Frame(_))
        ));
    }

    #[test]
    fn test_hamming_distance() {
        let a = "0".repeat(64);
        let b = format!("{}{}", "0".repeat(63), "f");
        assert_eq!(hamming_distance(&a, &b).unwrap(), 4);
        assert!(hamming_distance(&a, "xyz").is_err());
    }

    #[test]
    fn test_find_removable() {
        let zero = "0".repeat(64);
        let near = format!("{}{}", "0".repeat(63), "1");
        let far = "f".repeat(64);
        let blank = format!("7{}", "f".repeat(63));

        let registry = ExclusionRegistry::with_defaults();
        let items = find_removable(
            &[zero, near, far, blank, "bogus".to_string()],
            10,
            Some(&registry),
        );

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].index, 1);
        assert_eq!(
            items[0].reason,
            RemovalReason::Duplicate {
                duplicate_of: 0,
                distance: 1
            }
        );
        // 第 2 张与空白画面排除项只差 1 位
        assert_eq!(items[1].index, 2);
        assert!(matches!(items[1].reason, RemovalReason::Excluded { distance: 1, .. }));
        // 第 3 张是第 2 张的重复
        assert_eq!(items[2].index, 3);
        assert!(matches!(items[2].reason, RemovalReason::Duplicate { duplicate_of: 2, distance: 1 }));
    }
}

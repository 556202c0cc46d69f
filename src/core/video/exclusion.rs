//! 指纹排除列表
//!
//! 读多写少：所有会话并发读取同一份快照，写操作经由单一写锁串行化，
//! 写完后整体替换快照。正在进行的比对继续持有旧快照，不受影响。

use super::phash::Fingerprint;
use crate::core::error::RegistryError;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use uuid::Uuid;

pub const BLANK_SCREEN_PRESET_ID: &str = "preset-blank-screen";

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExclusionEntry {
    pub id: String,
    pub name: String,
    #[serde(rename = "pHash")]
    pub fingerprint: Fingerprint,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_preset: bool,
    #[serde(default = "enabled_by_default")]
    pub is_enabled: bool,
}

/// 命中的排除项
#[derive(Debug, Clone, PartialEq)]
pub struct ExclusionMatch {
    pub id: String,
    pub name: String,
    pub distance: u32,
}

/// 首次运行时写入的预置项
fn preset_entries() -> Vec<ExclusionEntry> {
    // 纯色画面（黑屏、白屏、加载中的纯色背景）的指纹
    let mut blank = [0xffu8; 32];
    blank[0] = 0x7f;

    vec![ExclusionEntry {
        id: BLANK_SCREEN_PRESET_ID.to_string(),
        name: "Blank screen".to_string(),
        fingerprint: Fingerprint::from_bytes(blank),
        created_at: Utc::now(),
        is_preset: true,
        is_enabled: true,
    }]
}

struct RegistryInner {
    snapshot: RwLock<Arc<Vec<ExclusionEntry>>>,
    writer: Mutex<()>,
    store: Option<PathBuf>,
}

/// 排除列表句柄，可廉价克隆后分发给各个会话
#[derive(Clone)]
pub struct ExclusionRegistry {
    inner: Arc<RegistryInner>,
}

impl ExclusionRegistry {
    fn from_entries(entries: Vec<ExclusionEntry>, store: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                snapshot: RwLock::new(Arc::new(entries)),
                writer: Mutex::new(()),
                store,
            }),
        }
    }

    /// 仅在内存中的空列表
    pub fn empty() -> Self {
        Self::from_entries(Vec::new(), None)
    }

    /// 仅在内存中、带预置项的列表
    pub fn with_defaults() -> Self {
        Self::from_entries(preset_entries(), None)
    }

    /// 打开持久化列表；文件不存在时视为首次运行，写入预置项
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            let json = fs::read_to_string(&path)?;
            let entries: Vec<ExclusionEntry> = serde_json::from_str(&json)?;
            info!("📋 加载排除列表: {} 项 ({})", entries.len(), path.display());
            return Ok(Self::from_entries(entries, Some(path)));
        }

        let entries = preset_entries();
        persist(&path, &entries)?;
        info!("📋 初始化排除列表: {} 个预置项 ({})", entries.len(), path.display());
        Ok(Self::from_entries(entries, Some(path)))
    }

    /// 当前快照（只读，写操作不会修改已取出的快照）
    pub fn snapshot(&self) -> Arc<Vec<ExclusionEntry>> {
        self.inner
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn load(&self) -> Vec<ExclusionEntry> {
        self.snapshot().as_ref().clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn add(&self, name: &str, fingerprint: Fingerprint) -> Result<ExclusionEntry, RegistryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }

        let entry = ExclusionEntry {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            fingerprint,
            created_at: Utc::now(),
            is_preset: false,
            is_enabled: true,
        };
        let candidate = entry.clone();
        self.mutate(move |entries| {
            if entries.iter().any(|e| e.name == candidate.name) {
                return Err(RegistryError::DuplicateName(candidate.name));
            }
            entries.push(candidate);
            Ok(true)
        })?;

        info!("➕ 新增排除项: {} ({})", entry.name, entry.fingerprint);
        Ok(entry)
    }

    pub fn remove(&self, id: &str) -> Result<bool, RegistryError> {
        self.mutate(|entries| {
            let before = entries.len();
            entries.retain(|e| e.id != id);
            Ok(entries.len() != before)
        })
    }

    /// 重命名；id 不存在时返回 false，新名称为空或重名时报错
    pub fn rename(&self, id: &str, new_name: &str) -> Result<bool, RegistryError> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(RegistryError::EmptyName);
        }

        self.mutate(|entries| {
            if entries.iter().any(|e| e.name == new_name && e.id != id) {
                return Err(RegistryError::DuplicateName(new_name.to_string()));
            }
            match entries.iter_mut().find(|e| e.id == id) {
                Some(entry) => {
                    entry.name = new_name.to_string();
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<bool, RegistryError> {
        self.mutate(|entries| match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.is_enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        })
    }

    pub fn clear(&self) -> Result<(), RegistryError> {
        self.mutate(|entries| {
            let changed = !entries.is_empty();
            entries.clear();
            Ok(changed)
        })?;
        info!("🧹 排除列表已清空");
        Ok(())
    }

    /// 在 `[low, up]` 汉明距离窗口内距离最近的启用项
    pub fn find_match(&self, fingerprint: &Fingerprint, low: u32, up: u32) -> Option<ExclusionMatch> {
        let snapshot = self.snapshot();
        let found = find_in(&snapshot, fingerprint, low, up);
        if let Some(m) = &found {
            debug!("🚫 指纹命中排除项 {} (distance={})", m.name, m.distance);
        }
        found
    }

    pub fn is_excluded(&self, fingerprint: &Fingerprint, low: u32, up: u32) -> bool {
        self.find_match(fingerprint, low, up).is_some()
    }

    /// 串行化写：复制当前列表 → 修改 → 落盘 → 替换快照。
    /// 闭包返回 `Ok(false)` 表示无变化，不落盘也不替换。
    fn mutate<F>(&self, f: F) -> Result<bool, RegistryError>
    where
        F: FnOnce(&mut Vec<ExclusionEntry>) -> Result<bool, RegistryError>,
    {
        let _guard = self.inner.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut entries = self.snapshot().as_ref().clone();
        if !f(&mut entries)? {
            return Ok(false);
        }

        if let Some(path) = &self.inner.store {
            persist(path, &entries)?;
        }

        *self
            .inner
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(entries);
        Ok(true)
    }
}

impl Default for ExclusionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

pub(crate) fn find_in(
    entries: &[ExclusionEntry],
    fingerprint: &Fingerprint,
    low: u32,
    up: u32,
) -> Option<ExclusionMatch> {
    entries
        .iter()
        .filter(|e| e.is_enabled)
        .map(|e| (e, e.fingerprint.hamming_distance(fingerprint)))
        .filter(|(_, d)| (low..=up).contains(d))
        .min_by_key(|(_, d)| *d)
        .map(|(e, distance)| ExclusionMatch {
            id: e.id.clone(),
            name: e.name.clone(),
            distance,
        })
}

fn persist(path: &Path, entries: &[ExclusionEntry]) -> Result<(), RegistryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(entries)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json)?;
    if let Err(e) = fs::rename(&tmp, path) {
        warn!("⚠️ 排除列表写入失败: {}", e);
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

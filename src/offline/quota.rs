//! 存储用量探查
//!
//! 报告本地数据库占用与配额，并提供持久化请求。
//! 无文件可量的宿主（内存库）返回"不支持"哨兵；持久化被拒绝是
//! 宿主策略的正常结果，不是错误。

use crate::offline::models::StorageEstimate;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// 默认配额：50 MB（面向低端设备的保守值）
pub const DEFAULT_QUOTA_BYTES: u64 = 50 * 1024 * 1024;

/// 存储探查器
pub struct StorageInspector {
    /// 数据库文件路径；None 表示内存库（无持久化能力）
    db_file: Option<PathBuf>,
    quota_bytes: u64,
}

impl StorageInspector {
    pub fn new(db_file: Option<PathBuf>, quota_bytes: u64) -> Self {
        Self {
            db_file,
            quota_bytes,
        }
    }

    /// 从数据库 URL 推断文件路径（内存库推断为 None）
    pub fn from_db_url(db_url: &str, quota_bytes: u64) -> Self {
        let db_file = parse_db_file(db_url);
        Self::new(db_file, quota_bytes)
    }

    /// 估算存储用量
    ///
    /// 返回 None 表示宿主不支持用量估算（内存库或文件不可访问）。
    pub async fn estimate_usage(&self) -> Option<StorageEstimate> {
        let path = self.db_file.as_ref()?;

        // WAL 模式下日志文件也计入用量
        let mut used: u64 = 0;
        for suffix in ["", "-wal", "-shm"] {
            let mut candidate = path.as_os_str().to_owned();
            candidate.push(suffix);
            if let Ok(meta) = tokio::fs::metadata(PathBuf::from(&candidate)).await {
                used += meta.len();
            }
        }
        if used == 0 && tokio::fs::metadata(path).await.is_err() {
            debug!("[Quota] 数据库文件不存在，无法估算用量");
            return None;
        }

        let percentage = if self.quota_bytes > 0 {
            ((used as f64 / self.quota_bytes as f64) * 100.0).round() as u8
        } else {
            0
        };
        Some(StorageEstimate {
            used_bytes: used,
            quota_bytes: self.quota_bytes,
            percentage: percentage.min(100),
        })
    }

    /// 请求宿主不要在存储压力下驱逐本应用的数据
    ///
    /// 通过对数据库文件做一次 fsync 探测其所在文件系统是否可持久；
    /// 内存库一律拒绝。拒绝是正常结果。
    pub async fn request_persistence(&self) -> bool {
        let Some(path) = self.db_file.as_ref() else {
            debug!("[Quota] 内存库无持久化能力，请求被拒绝");
            return false;
        };

        match tokio::fs::File::open(path).await {
            Ok(file) => match file.sync_all().await {
                Ok(()) => {
                    info!("[Quota] ✅ 持久化存储请求已授予");
                    true
                }
                Err(e) => {
                    warn!("[Quota] 持久化探测失败，请求被拒绝: {}", e);
                    false
                }
            },
            Err(e) => {
                warn!("[Quota] 数据库文件不可访问，请求被拒绝: {}", e);
                false
            }
        }
    }
}

/// 从 sqlite URL 里取出文件路径；内存库返回 None
fn parse_db_file(db_url: &str) -> Option<PathBuf> {
    if db_url.contains(":memory:") || db_url.contains("mode=memory") {
        return None;
    }
    let path = db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))
        .unwrap_or(db_url);
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return None;
    }
    Some(PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::db::{open_offline_db, SCHEMA_VERSION};

    #[tokio::test]
    async fn test_estimate_for_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("quota_test.db");
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let _pool = open_offline_db(&db_url, SCHEMA_VERSION).await.unwrap();

        let inspector = StorageInspector::from_db_url(&db_url, 1024 * 1024);
        let estimate = inspector.estimate_usage().await.expect("文件库应可估算");
        assert!(estimate.used_bytes > 0);
        assert_eq!(estimate.quota_bytes, 1024 * 1024);
        assert!(estimate.percentage <= 100);

        assert!(inspector.request_persistence().await);
    }

    #[tokio::test]
    async fn test_memory_store_is_unsupported() {
        let inspector = StorageInspector::from_db_url("sqlite::memory:", DEFAULT_QUOTA_BYTES);
        assert!(inspector.estimate_usage().await.is_none());
        assert!(!inspector.request_persistence().await);
    }

    #[test]
    fn test_parse_db_file() {
        assert_eq!(
            parse_db_file("sqlite:///tmp/a.db?mode=rwc"),
            Some(PathBuf::from("/tmp/a.db"))
        );
        assert_eq!(parse_db_file("sqlite::memory:"), None);
    }
}

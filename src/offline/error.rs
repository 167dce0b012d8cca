//! 本地存储错误分类
//!
//! 服务层统一使用 anyhow 传播错误；这里的 `StoreError` 只承载需要被
//! 上层区分处理的几类（存储不可用、配额耗尽），通过 anyhow downcast 取回。

use thiserror::Error;

/// 本地存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 宿主环境没有可用的持久化存储（数据库无法打开）
    #[error("存储不可用: {0}")]
    StorageUnavailable(String),

    /// 设备配额耗尽（SQLITE_FULL），写入失败，不自动重试
    #[error("存储配额耗尽")]
    QuotaExceeded,
}

/// SQLITE_FULL 的扩展错误码
const SQLITE_FULL: &str = "13";

/// 将 sqlx 写入错误映射为带分类的 anyhow 错误
///
/// 磁盘/配额耗尽映射为 `StoreError::QuotaExceeded`，其余原样包装。
pub fn map_write_err(e: sqlx::Error) -> anyhow::Error {
    if let Some(db_err) = e.as_database_error() {
        if db_err.code().as_deref() == Some(SQLITE_FULL) {
            return anyhow::Error::new(StoreError::QuotaExceeded);
        }
    }
    anyhow::Error::new(e)
}

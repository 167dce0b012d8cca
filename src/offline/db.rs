//! SQLite 数据库工具：创建连接池并应用版本门控的表结构
//!
//! 对应原应用 IndexedDB 的 `open(name, version)` 语义：
//! 首次打开或版本号提升时建表（含二级索引），通过 `PRAGMA user_version` 门控。

use crate::offline::error::StoreError;
use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use tracing::{debug, info};

/// 当前表结构版本（与原应用 IndexedDB 版本对齐）
pub const SCHEMA_VERSION: i32 = 2;

/// 创建 SQLite 连接池并应用表结构
///
/// 幂等：重复打开同一数据库不会重建已有集合。
/// 数据库无法打开时返回 `StoreError::StorageUnavailable`。
pub async fn open_offline_db(db_url: &str, schema_version: i32) -> Result<Pool<Sqlite>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .map_err(|e| anyhow::Error::new(StoreError::StorageUnavailable(e.to_string())))?;

    apply_schema(&pool, schema_version).await?;
    Ok(pool)
}

/// 应用版本门控的表结构升级
pub async fn apply_schema(db: &Pool<Sqlite>, schema_version: i32) -> Result<()> {
    let row = sqlx::query("PRAGMA user_version")
        .fetch_one(db)
        .await
        .context("读取 user_version 失败")?;
    let current: i32 = row.get(0);

    if current >= schema_version {
        debug!(
            "[OfflineDB] 表结构已是最新版本 {}（目标 {}），跳过升级",
            current, schema_version
        );
        return Ok(());
    }

    info!(
        "[OfflineDB] 升级表结构: {} -> {}",
        current, schema_version
    );

    // 对话日志：追加写入，按 language / timestamp 建二级索引
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS local_conversations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            payload TEXT NOT NULL DEFAULT '{}',
            language TEXT NOT NULL DEFAULT '',
            timestamp INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(db)
    .await
    .context("创建对话表失败")?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversations_language ON local_conversations (language)",
    )
    .execute(db)
    .await
    .context("创建对话语言索引失败")?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversations_timestamp ON local_conversations (timestamp)",
    )
    .execute(db)
    .await
    .context("创建对话时间索引失败")?;

    // 资源缓存：cache_key 为主键，构造上保证唯一
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resource_cache (
            cache_key TEXT PRIMARY KEY,
            category TEXT NOT NULL DEFAULT '',
            language TEXT NOT NULL DEFAULT '',
            data TEXT NOT NULL DEFAULT '{}',
            cached_at INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(db)
    .await
    .context("创建资源缓存表失败")?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_resource_cache_language ON resource_cache (language)",
    )
    .execute(db)
    .await
    .context("创建资源缓存语言索引失败")?;

    // 用户画像：每个安装一条逻辑行
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_profile (
            id TEXT PRIMARY KEY,
            data TEXT NOT NULL DEFAULT '{}',
            updated_at INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(db)
    .await
    .context("创建用户画像表失败")?;

    // 待同步队列：按 id FIFO 排水，确认送达后才删除
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pending_sync (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL DEFAULT '',
            method TEXT NOT NULL DEFAULT 'POST',
            body TEXT NOT NULL DEFAULT '{}',
            action_type TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL DEFAULT 0,
            attempts INTEGER NOT NULL DEFAULT 0,
            dead INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(db)
    .await
    .context("创建待同步队列表失败")?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pending_sync_type ON pending_sync (action_type)")
        .execute(db)
        .await
        .context("创建待同步类型索引失败")?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pending_sync_created_at ON pending_sync (created_at)",
    )
    .execute(db)
    .await
    .context("创建待同步时间索引失败")?;

    sqlx::query(&format!("PRAGMA user_version = {}", schema_version))
        .execute(db)
        .await
        .context("写入 user_version 失败")?;

    info!("[OfflineDB] 表结构升级完成");
    Ok(())
}

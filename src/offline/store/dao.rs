//! 离线存储数据访问层（DAO）
//!
//! 负责四个集合的所有数据库操作，将数据访问逻辑与业务逻辑分离。
//! 每次写入都是单条语句的原子事务；读取不到的记录一律返回 Ok(None)，
//! 不作为错误处理（损坏的 JSON 同样视为缺失）。

use crate::offline::error::map_write_err;
use crate::offline::models::{
    now_millis, ConversationRecord, NewSyncAction, PendingSyncAction, ResourceCacheEntry,
    UserProfileRecord,
};
use anyhow::{Context, Result};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, warn};

/// 对话日志 DAO（追加写入）
pub struct ConversationDao {
    db: Pool<Sqlite>,
}

impl ConversationDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 追加一条对话记录，返回分配的自增 ID
    ///
    /// 记录入库后永不修改、永不删除；时间戳由存储层补齐。
    pub async fn insert(&self, payload: &serde_json::Value, language: &str) -> Result<i64> {
        let payload_text = serde_json::to_string(payload).context("序列化对话内容失败")?;
        let result = sqlx::query(
            r#"
            INSERT INTO local_conversations (payload, language, timestamp)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&payload_text)
        .bind(language)
        .bind(now_millis())
        .execute(&self.db)
        .await
        .map_err(map_write_err)
        .context("写入对话记录失败")?;

        let id = result.last_insert_rowid();
        debug!("[ConvDAO] 追加对话记录: id={}, language={}", id, language);
        Ok(id)
    }

    /// 按语言过滤读取对话记录（language 为空则读全部），按时间升序，最多 limit 条
    pub async fn list(
        &self,
        language: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ConversationRecord>> {
        let rows = match language {
            Some(lang) => {
                sqlx::query(
                    r#"
                    SELECT id, payload, language, timestamp
                    FROM local_conversations
                    WHERE language = ?
                    ORDER BY timestamp ASC, id ASC
                    LIMIT ?
                    "#,
                )
                .bind(lang)
                .bind(limit as i64)
                .fetch_all(&self.db)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, payload, language, timestamp
                    FROM local_conversations
                    ORDER BY timestamp ASC, id ASC
                    LIMIT ?
                    "#,
                )
                .bind(limit as i64)
                .fetch_all(&self.db)
                .await
            }
        }
        .context("查询对话记录失败")?;

        let records: Vec<ConversationRecord> = rows
            .into_iter()
            .map(|row| {
                let payload_text: String = row.get("payload");
                ConversationRecord {
                    id: row.get("id"),
                    payload: serde_json::from_str(&payload_text).unwrap_or_default(),
                    language: row.get("language"),
                    timestamp: row.get("timestamp"),
                }
            })
            .collect();

        debug!("[ConvDAO] 读取对话记录，共 {} 条", records.len());
        Ok(records)
    }

    /// 对话记录总数
    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM local_conversations")
            .fetch_one(&self.db)
            .await
            .context("统计对话记录失败")?;
        Ok(row.get("total"))
    }
}

/// 资源缓存 DAO（按 key 覆盖写）
pub struct ResourceCacheDao {
    db: Pool<Sqlite>,
}

impl ResourceCacheDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 插入或覆盖一条资源缓存（最后写入者胜出，无版本化）
    pub async fn upsert(
        &self,
        category: &str,
        language: &str,
        data: &serde_json::Value,
    ) -> Result<()> {
        let key = ResourceCacheEntry::make_key(category, language);
        let data_text = serde_json::to_string(data).context("序列化资源数据失败")?;
        sqlx::query(
            r#"
            INSERT INTO resource_cache (cache_key, category, language, data, cached_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(cache_key) DO UPDATE SET
                category = excluded.category,
                language = excluded.language,
                data = excluded.data,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(&key)
        .bind(category)
        .bind(language)
        .bind(&data_text)
        .bind(now_millis())
        .execute(&self.db)
        .await
        .map_err(map_write_err)
        .context("写入资源缓存失败")?;

        debug!("[ResCache] 缓存资源: key={}", key);
        Ok(())
    }

    /// 按类别+语言读取资源缓存，缺失返回 Ok(None)
    pub async fn get(&self, category: &str, language: &str) -> Result<Option<ResourceCacheEntry>> {
        let key = ResourceCacheEntry::make_key(category, language);
        let row = sqlx::query(
            r#"
            SELECT cache_key, category, language, data, cached_at
            FROM resource_cache
            WHERE cache_key = ?
            "#,
        )
        .bind(&key)
        .fetch_optional(&self.db)
        .await
        .context("查询资源缓存失败")?;

        Ok(row.and_then(|row| {
            let data_text: String = row.get("data");
            // 损坏的缓存内容视为缺失，交给上层走刷新路径
            let data = match serde_json::from_str(&data_text) {
                Ok(v) => v,
                Err(e) => {
                    warn!("[ResCache] 缓存内容损坏，按缺失处理: key={}, {}", key, e);
                    return None;
                }
            };
            Some(ResourceCacheEntry {
                cache_key: row.get("cache_key"),
                category: row.get("category"),
                language: row.get("language"),
                data,
                cached_at: row.get("cached_at"),
            })
        }))
    }

    /// 删除一条资源缓存；删除不存在的 key 视为成功
    pub async fn delete(&self, category: &str, language: &str) -> Result<()> {
        let key = ResourceCacheEntry::make_key(category, language);
        sqlx::query("DELETE FROM resource_cache WHERE cache_key = ?")
            .bind(&key)
            .execute(&self.db)
            .await
            .context("删除资源缓存失败")?;
        Ok(())
    }

    /// 按 cached_at 淘汰最旧的条目，只保留最近的 keep 条
    ///
    /// 配额耗尽时由上层显式调用，返回淘汰的条目数。
    pub async fn evict_oldest(&self, keep: usize) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM resource_cache
            WHERE cache_key NOT IN (
                SELECT cache_key FROM resource_cache
                ORDER BY cached_at DESC
                LIMIT ?
            )
            "#,
        )
        .bind(keep as i64)
        .execute(&self.db)
        .await
        .context("淘汰资源缓存失败")?;

        let evicted = result.rows_affected();
        if evicted > 0 {
            debug!("[ResCache] 淘汰最旧资源缓存 {} 条，保留 {}", evicted, keep);
        }
        Ok(evicted)
    }

    /// 缓存条目总数
    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM resource_cache")
            .fetch_one(&self.db)
            .await
            .context("统计资源缓存失败")?;
        Ok(row.get("total"))
    }
}

/// 用户画像 DAO（单逻辑行）
pub struct ProfileDao {
    db: Pool<Sqlite>,
}

impl ProfileDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 插入或覆盖用户画像
    pub async fn upsert(&self, id: &str, data: &serde_json::Value) -> Result<()> {
        let data_text = serde_json::to_string(data).context("序列化用户画像失败")?;
        sqlx::query(
            r#"
            INSERT INTO user_profile (id, data, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(&data_text)
        .bind(now_millis())
        .execute(&self.db)
        .await
        .map_err(map_write_err)
        .context("写入用户画像失败")?;

        debug!("[Profile] 保存用户画像: id={}", id);
        Ok(())
    }

    /// 读取用户画像，缺失返回 Ok(None)
    pub async fn get(&self, id: &str) -> Result<Option<UserProfileRecord>> {
        let row = sqlx::query("SELECT id, data, updated_at FROM user_profile WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("查询用户画像失败")?;

        Ok(row.map(|row| {
            let data_text: String = row.get("data");
            UserProfileRecord {
                id: row.get("id"),
                data: serde_json::from_str(&data_text).unwrap_or_default(),
                updated_at: row.get("updated_at"),
            }
        }))
    }

    /// 删除用户画像；删除不存在的 id 视为成功
    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM user_profile WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await
            .context("删除用户画像失败")?;
        Ok(())
    }
}

/// 待同步队列 DAO
pub struct SyncQueueDao {
    db: Pool<Sqlite>,
}

impl SyncQueueDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 入队一条待同步动作，返回分配的自增 ID
    pub async fn enqueue(&self, action: &NewSyncAction) -> Result<i64> {
        let body_text = serde_json::to_string(&action.body).context("序列化动作请求体失败")?;
        let result = sqlx::query(
            r#"
            INSERT INTO pending_sync (url, method, body, action_type, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&action.url)
        .bind(&action.method)
        .bind(&body_text)
        .bind(&action.action_type)
        .bind(now_millis())
        .execute(&self.db)
        .await
        .map_err(map_write_err)
        .context("入队待同步动作失败")?;

        let id = result.last_insert_rowid();
        debug!(
            "[SyncQueue] 入队动作: id={}, type={}, {} {}",
            id, action.action_type, action.method, action.url
        );
        Ok(id)
    }

    /// 按创建顺序（FIFO）读取待投递动作
    ///
    /// include_dead 为 false 时跳过死信条目。
    pub async fn pending_in_order(&self, include_dead: bool) -> Result<Vec<PendingSyncAction>> {
        let sql = if include_dead {
            r#"
            SELECT id, url, method, body, action_type, created_at, attempts, dead
            FROM pending_sync
            ORDER BY id ASC
            "#
        } else {
            r#"
            SELECT id, url, method, body, action_type, created_at, attempts, dead
            FROM pending_sync
            WHERE dead = 0
            ORDER BY id ASC
            "#
        };
        let rows = sqlx::query(sql)
            .fetch_all(&self.db)
            .await
            .context("查询待同步队列失败")?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let body_text: String = row.get("body");
                let dead: i64 = row.get("dead");
                PendingSyncAction {
                    id: row.get("id"),
                    url: row.get("url"),
                    method: row.get("method"),
                    body: serde_json::from_str(&body_text).unwrap_or_default(),
                    action_type: row.get("action_type"),
                    created_at: row.get("created_at"),
                    attempts: row.get("attempts"),
                    dead: dead != 0,
                }
            })
            .collect())
    }

    /// 删除一条动作（投递确认成功后调用）；删除不存在的 id 视为成功
    pub async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM pending_sync WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await
            .context("删除待同步动作失败")?;
        debug!("[SyncQueue] 移除已送达动作: id={}", id);
        Ok(())
    }

    /// 记录一次投递失败；达到 max_attempts 后标记为死信
    ///
    /// 返回该动作是否被标记为死信。
    pub async fn record_failure(&self, id: i64, max_attempts: i32) -> Result<bool> {
        sqlx::query(
            r#"
            UPDATE pending_sync
            SET attempts = attempts + 1,
                dead = CASE WHEN attempts + 1 >= ? THEN 1 ELSE 0 END
            WHERE id = ?
            "#,
        )
        .bind(max_attempts)
        .bind(id)
        .execute(&self.db)
        .await
        .context("记录投递失败次数失败")?;

        let row = sqlx::query("SELECT dead FROM pending_sync WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("查询死信标记失败")?;

        let dead = row.map(|r| r.get::<i64, _>("dead") != 0).unwrap_or(false);
        if dead {
            warn!(
                "[SyncQueue] ⚠️ 动作 {} 连续失败达 {} 次，标记为死信",
                id, max_attempts
            );
        }
        Ok(dead)
    }

    /// 队列中非死信动作数量
    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM pending_sync WHERE dead = 0")
            .fetch_one(&self.db)
            .await
            .context("统计待同步队列失败")?;
        Ok(row.get("total"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::db::{open_offline_db, SCHEMA_VERSION};
    use serde_json::json;

    async fn open_test_db() -> (tempfile::TempDir, Pool<Sqlite>) {
        let dir = tempfile::tempdir().expect("创建临时目录失败");
        let db_path = dir.path().join("offline_test.db");
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = open_offline_db(&db_url, SCHEMA_VERSION)
            .await
            .expect("打开测试数据库失败");
        (dir, pool)
    }

    #[tokio::test]
    async fn test_conversation_log_append_only() -> Result<()> {
        let (_dir, pool) = open_test_db().await;
        let dao = ConversationDao::new(pool);

        // 相同内容写两次，仍应产生两条 ID 递增的独立记录
        let payload = json!({"query": "career advice", "response": "learn digital skills"});
        let id1 = dao.insert(&payload, "en").await?;
        let id2 = dao.insert(&payload, "en").await?;
        assert!(id2 > id1);

        let records = dao.list(Some("en"), 50).await?;
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].id, records[1].id);
        assert!(records[0].timestamp <= records[1].timestamp);
        Ok(())
    }

    #[tokio::test]
    async fn test_conversation_list_filters_by_language() -> Result<()> {
        let (_dir, pool) = open_test_db().await;
        let dao = ConversationDao::new(pool);

        dao.insert(&json!({"q": "a"}), "en").await?;
        dao.insert(&json!({"q": "b"}), "te").await?;
        dao.insert(&json!({"q": "c"}), "en").await?;

        assert_eq!(dao.list(Some("en"), 50).await?.len(), 2);
        assert_eq!(dao.list(Some("te"), 50).await?.len(), 1);
        assert_eq!(dao.list(None, 50).await?.len(), 3);
        assert_eq!(dao.list(None, 2).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_resource_upsert_is_idempotent() -> Result<()> {
        let (_dir, pool) = open_test_db().await;
        let dao = ResourceCacheDao::new(pool);

        let data = json!({"sectors": [{"name": "Digital Skills"}]});
        dao.upsert("lig_workers", "en", &data).await?;
        let first = dao.get("lig_workers", "en").await?.expect("缓存应存在");

        // 保证第二次写入的 cached_at 不会落后于第一次
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        dao.upsert("lig_workers", "en", &data).await?;
        let second = dao.get("lig_workers", "en").await?.expect("缓存应存在");

        assert_eq!(dao.count().await?, 1);
        assert_eq!(second.data, data);
        assert!(second.cached_at >= first.cached_at);
        Ok(())
    }

    #[tokio::test]
    async fn test_not_found_is_not_an_error() -> Result<()> {
        let (_dir, pool) = open_test_db().await;
        let resources = ResourceCacheDao::new(pool.clone());
        let profiles = ProfileDao::new(pool);

        assert!(resources.get("nonexistent", "en").await?.is_none());
        assert!(profiles.get("nonexistent-key").await?.is_none());

        // 删除不存在的 key 同样是无操作成功
        resources.delete("nonexistent", "en").await?;
        profiles.delete("nonexistent-key").await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_profile_single_logical_row() -> Result<()> {
        let (_dir, pool) = open_test_db().await;
        let dao = ProfileDao::new(pool);

        dao.upsert("local-user", &json!({"name": "Ravi"})).await?;
        dao.upsert("local-user", &json!({"name": "Ravi", "district": "Shivamogga"}))
            .await?;

        let profile = dao.get("local-user").await?.expect("画像应存在");
        assert_eq!(profile.data["district"], "Shivamogga");
        Ok(())
    }

    #[tokio::test]
    async fn test_sync_queue_fifo_and_failure_marking() -> Result<()> {
        let (_dir, pool) = open_test_db().await;
        let dao = SyncQueueDao::new(pool);

        for label in ["a", "b", "c"] {
            dao.enqueue(&NewSyncAction {
                url: format!("http://localhost/api/{}", label),
                method: "POST".to_string(),
                body: json!({"label": label}),
                action_type: "test".to_string(),
            })
            .await?;
        }

        let pending = dao.pending_in_order(false).await?;
        assert_eq!(pending.len(), 3);
        assert!(pending.windows(2).all(|w| w[0].id < w[1].id));

        // 两次失败即死信（max_attempts=2）
        let id = pending[1].id;
        assert!(!dao.record_failure(id, 2).await?);
        assert!(dao.record_failure(id, 2).await?);

        let alive = dao.pending_in_order(false).await?;
        assert_eq!(alive.len(), 2);
        let all = dao.pending_in_order(true).await?;
        assert_eq!(all.len(), 3);
        assert!(all.iter().find(|a| a.id == id).unwrap().dead);
        Ok(())
    }

    #[tokio::test]
    async fn test_resource_eviction_keeps_newest() -> Result<()> {
        let (_dir, pool) = open_test_db().await;
        let dao = ResourceCacheDao::new(pool);

        for (i, lang) in ["en", "te", "kn", "hi"].iter().enumerate() {
            dao.upsert("lig_workers", lang, &json!({"seq": i})).await?;
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let evicted = dao.evict_oldest(2).await?;
        assert_eq!(evicted, 2);
        assert_eq!(dao.count().await?, 2);
        // 最新写入的 kn / hi 应保留
        assert!(dao.get("lig_workers", "hi").await?.is_some());
        assert!(dao.get("lig_workers", "en").await?.is_none());
        Ok(())
    }
}

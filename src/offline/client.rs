//! 离线客户端门面
//!
//! 调用方唯一的入口：对外隐藏一次读写究竟落在本地存储、
//! 后台工作者缓存还是网络上。显式构造、显式持有，
//! `init()` / `shutdown()` 管理生命周期，不依赖任何界面框架的挂载时机。

use crate::offline::db::{open_offline_db, SCHEMA_VERSION};
use crate::offline::models::{
    ConversationRecord, NewSyncAction, ResourceCacheEntry, StorageEstimate, UserProfileRecord,
};
use crate::offline::network::{NetworkEvent, NetworkMonitor};
use crate::offline::quota::{StorageInspector, DEFAULT_QUOTA_BYTES};
use crate::offline::resource::{HttpResourceFetcher, ResourceFetcher};
use crate::offline::store::{ConversationDao, ProfileDao, ResourceCacheDao, SyncQueueDao};
use crate::offline::sync::{
    EmptySyncListener, HttpSyncTransport, SyncDispatcher, SyncListener, SyncReport, SyncTransport,
};
use crate::offline::worker::{SeedOutcome, WorkerLifecycle};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// 离线客户端配置
pub struct ClientConfig {
    /// 数据库路径（SQLite），可以是：
    /// - 相对/绝对路径：如 "offline.db"，会转换为 "sqlite://offline.db?mode=rwc"
    /// - 完整URL：如 "sqlite://offline.db?mode=rwc" 直接使用
    pub db_path: String,
    /// API 基础 URL
    pub api_base_url: String,
    /// 表结构版本
    pub schema_version: i32,
    /// 存储配额（字节）
    pub quota_bytes: u64,
    /// 在线刷新路径上的请求超时（同步排水依赖传输默认超时）
    pub request_timeout: Duration,
    /// 同步动作死信阈值
    pub max_sync_attempts: i32,
    /// 后台工作者版本
    pub worker_version: String,
    /// 启动时的连通状态
    pub initial_online: bool,
}

impl ClientConfig {
    pub fn new(db_path: String, api_base_url: String) -> Self {
        Self {
            db_path,
            api_base_url,
            schema_version: SCHEMA_VERSION,
            quota_bytes: DEFAULT_QUOTA_BYTES,
            request_timeout: Duration::from_secs(10),
            max_sync_attempts: crate::offline::sync::dispatcher::DEFAULT_MAX_ATTEMPTS,
            worker_version: "2.0.0".to_string(),
            initial_online: true,
        }
    }

    fn db_url(&self) -> String {
        if self.db_path.starts_with("sqlite:") {
            self.db_path.clone()
        } else {
            format!("sqlite://{}?mode=rwc", self.db_path)
        }
    }
}

/// 离线客户端
pub struct OfflineClient {
    db: sqlx::Pool<sqlx::Sqlite>,
    conversations: ConversationDao,
    resources: ResourceCacheDao,
    profiles: ProfileDao,
    dispatcher: Arc<SyncDispatcher>,
    monitor: Arc<NetworkMonitor>,
    worker: Arc<WorkerLifecycle>,
    inspector: StorageInspector,
    fetcher: Arc<dyn ResourceFetcher>,
    drain_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl OfflineClient {
    /// 初始化客户端（使用默认空监听器与 HTTP 传输）
    pub async fn init(config: ClientConfig) -> Result<Self> {
        Self::init_with_listener(config, Arc::new(EmptySyncListener)).await
    }

    /// 初始化客户端（带自定义同步监听器）
    pub async fn init_with_listener(
        config: ClientConfig,
        listener: Arc<dyn SyncListener>,
    ) -> Result<Self> {
        let http_client = reqwest::ClientBuilder::new()
            .timeout(config.request_timeout)
            .build()
            .context("创建 HTTP 客户端失败")?;

        let transport: Arc<dyn SyncTransport> =
            Arc::new(HttpSyncTransport::new(http_client.clone()));
        let fetcher: Arc<dyn ResourceFetcher> = Arc::new(HttpResourceFetcher::new(
            http_client,
            config.api_base_url.clone(),
        ));
        Self::init_with_transports(config, listener, transport, fetcher).await
    }

    /// 初始化客户端（完全注入传输与拉取实现）
    pub async fn init_with_transports(
        config: ClientConfig,
        listener: Arc<dyn SyncListener>,
        transport: Arc<dyn SyncTransport>,
        fetcher: Arc<dyn ResourceFetcher>,
    ) -> Result<Self> {
        let db_url = config.db_url();
        info!("[Client] 初始化离线客户端，SQLite数据库: {}", db_url);

        let db = open_offline_db(&db_url, config.schema_version).await?;

        let mut dispatcher =
            SyncDispatcher::with_listener(SyncQueueDao::new(db.clone()), transport, listener);
        dispatcher.set_max_attempts(config.max_sync_attempts);
        let dispatcher = Arc::new(dispatcher);

        let monitor = Arc::new(NetworkMonitor::new(config.initial_online));
        let inspector = StorageInspector::from_db_url(&db_url, config.quota_bytes);

        // 注册失败不致命：没有工作者就没有响应缓存种子，其余功能照常
        let worker = Arc::new(WorkerLifecycle::new());
        if let Err(e) = worker.register(&config.worker_version) {
            warn!("[Client] 工作者注册失败，继续以无离线缓存模式运行: {}", e);
        }

        let client = Self {
            conversations: ConversationDao::new(db.clone()),
            resources: ResourceCacheDao::new(db.clone()),
            profiles: ProfileDao::new(db.clone()),
            db,
            dispatcher,
            monitor,
            worker,
            inspector,
            fetcher,
            drain_task: Mutex::new(None),
        };

        client.spawn_reconnect_drain().await;
        info!("[Client] ✅ 离线客户端初始化完成");
        Ok(client)
    }

    /// 订阅重连信号，网络恢复时自动排空待同步队列
    async fn spawn_reconnect_drain(&self) {
        let mut events = self.monitor.subscribe();
        let dispatcher = self.dispatcher.clone();
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(NetworkEvent::Reconnected) => {
                        info!("[Client] 📡 网络恢复，触发后台同步");
                        if let Err(e) = dispatcher.drain().await {
                            warn!("[Client] 后台同步失败，队列保留待下一轮: {}", e);
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("[Client] 网络事件积压，丢弃 {} 条", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *self.drain_task.lock().await = Some(handle);
    }

    // ========== 对话日志 ==========

    /// 保存一条对话记录（仅写本地，对话历史按设计不上传）
    pub async fn save_conversation(
        &self,
        payload: &serde_json::Value,
        language: &str,
    ) -> Result<i64> {
        self.conversations.insert(payload, language).await
    }

    /// 读取对话记录（language 为空读全部）
    pub async fn get_conversations(
        &self,
        language: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ConversationRecord>> {
        self.conversations.list(language, limit).await
    }

    // ========== 用户画像 ==========

    /// 保存用户画像（调用方驱动，不自动同步）
    pub async fn save_profile(&self, id: &str, data: &serde_json::Value) -> Result<()> {
        self.profiles.upsert(id, data).await
    }

    /// 读取用户画像
    pub async fn get_profile(&self, id: &str) -> Result<Option<UserProfileRecord>> {
        self.profiles.get(id).await
    }

    // ========== 资源缓存 ==========

    /// 读取资源：离线优先，按需在线刷新
    ///
    /// 先读本地缓存；仅当 `refresh` 且当前在线时才拉取远端并覆盖写，
    /// 之后把拉到的数据顺手种到工作者缓存（尽力而为）。
    /// 远端拉取失败时回退到已有缓存；本地也没有缓存时错误原样上抛。
    pub async fn get_resource(
        &self,
        category: &str,
        language: &str,
        refresh: bool,
    ) -> Result<Option<ResourceCacheEntry>> {
        let cached = self.resources.get(category, language).await?;

        if !refresh || !self.monitor.is_online() {
            return Ok(cached);
        }

        match self.fetcher.fetch(category, language).await {
            Ok(data) => {
                self.resources.upsert(category, language, &data).await?;
                let key = ResourceCacheEntry::make_key(category, language);
                match self.worker.cache_payload(&key, data).await {
                    Ok(SeedOutcome::Seeded) => {}
                    Ok(SeedOutcome::NoActiveWorker) => {
                        // 可选优化路径，缺工作者不影响正确性
                    }
                    Err(e) => warn!("[Client] 工作者缓存种子投递失败: {}", e),
                }
                self.resources.get(category, language).await
            }
            // 有缓存时回退；无缓存的拉取失败必须让调用方看到，
            // 不能与"确实没有数据"混为一谈
            Err(e) if cached.is_some() => {
                warn!(
                    "[Client] 远端资源刷新失败，回退本地缓存: category={}, {}",
                    category, e
                );
                Ok(cached)
            }
            Err(e) => Err(e.context(format!("拉取远端资源失败且本地无缓存: {}", category))),
        }
    }

    /// 删除一条资源缓存
    pub async fn delete_resource(&self, category: &str, language: &str) -> Result<()> {
        self.resources.delete(category, language).await
    }

    /// 淘汰最旧的资源缓存，只保留最近的 keep 条（配额吃紧时由调用方触发）
    pub async fn evict_stale_resources(&self, keep: usize) -> Result<u64> {
        self.resources.evict_oldest(keep).await
    }

    // ========== 同步队列 ==========

    /// 入队一条待同步动作
    pub async fn enqueue_action(&self, action: &NewSyncAction) -> Result<i64> {
        self.dispatcher.enqueue(action).await
    }

    /// 显式排空待同步队列
    pub async fn drain_queue(&self) -> Result<SyncReport> {
        self.dispatcher.drain().await
    }

    /// 队列中待投递动作数量（不含死信）
    pub async fn pending_sync_count(&self) -> Result<i64> {
        self.dispatcher.pending_count().await
    }

    // ========== 工作者 ==========

    /// 尽力而为地向工作者投递响应缓存种子
    pub async fn cache_to_worker(
        &self,
        key: &str,
        payload: serde_json::Value,
    ) -> Result<SeedOutcome> {
        self.worker.cache_payload(key, payload).await
    }

    /// 查询工作者版本（无活跃工作者返回 None）
    pub async fn query_worker_version(&self) -> Option<String> {
        self.worker.query_version().await
    }

    /// 是否有新版本工作者等待接管
    pub fn update_available(&self) -> bool {
        self.worker.update_available()
    }

    /// 应用等待中的工作者更新（硬切换）
    pub async fn apply_update(&self) -> Result<()> {
        self.worker.apply_update().await
    }

    /// 工作者生命周期句柄（宿主事件注入用）
    pub fn worker(&self) -> &Arc<WorkerLifecycle> {
        &self.worker
    }

    // ========== 网络与安装 ==========

    /// 网络监视器句柄（宿主事件注入用）
    pub fn network(&self) -> &Arc<NetworkMonitor> {
        &self.monitor
    }

    /// 当前是否在线
    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }

    /// 触发安装提示（无提示可用时返回 false）
    pub async fn prompt_install(&self) -> bool {
        self.monitor.prompt_install().await
    }

    // ========== 存储探查 ==========

    /// 估算存储用量（不支持的宿主返回 None）
    pub async fn estimate_usage(&self) -> Option<StorageEstimate> {
        self.inspector.estimate_usage().await
    }

    /// 请求持久化存储（拒绝是正常结果）
    pub async fn request_persistence(&self) -> bool {
        self.inspector.request_persistence().await
    }

    /// 关闭客户端：停掉后台任务与工作者，关闭连接池
    pub async fn shutdown(&self) {
        if let Some(handle) = self.drain_task.lock().await.take() {
            handle.abort();
        }
        self.worker.shutdown().await;
        self.db.close().await;
        info!("[Client] 离线客户端已关闭");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::models::PendingSyncAction;
    use crate::offline::sync::{DeliveryStatus, SyncTransport};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// 计数的模拟资源拉取器
    struct CountingFetcher {
        calls: AtomicUsize,
        data: serde_json::Value,
    }

    impl CountingFetcher {
        fn new(data: serde_json::Value) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                data,
            }
        }
    }

    #[async_trait::async_trait]
    impl ResourceFetcher for CountingFetcher {
        async fn fetch(&self, _category: &str, _language: &str) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.data.clone())
        }
    }

    /// 可切换故障的模拟资源拉取器
    struct FlakyFetcher {
        failing: std::sync::atomic::AtomicBool,
        data: serde_json::Value,
    }

    #[async_trait::async_trait]
    impl ResourceFetcher for FlakyFetcher {
        async fn fetch(&self, _category: &str, _language: &str) -> Result<serde_json::Value> {
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("connection refused");
            }
            Ok(self.data.clone())
        }
    }

    /// 记录投递顺序的模拟传输
    struct RecordingTransport {
        log: StdMutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl SyncTransport for RecordingTransport {
        async fn deliver(&self, action: &PendingSyncAction) -> Result<DeliveryStatus> {
            self.log.lock().unwrap().push(action.url.clone());
            Ok(DeliveryStatus::Delivered)
        }
    }

    async fn test_client(
        dir: &tempfile::TempDir,
        fetcher: Arc<dyn ResourceFetcher>,
        transport: Arc<dyn SyncTransport>,
    ) -> OfflineClient {
        let db_path = dir.path().join("client_test.db");
        let config = ClientConfig::new(
            db_path.display().to_string(),
            "http://localhost:10002".to_string(),
        );
        OfflineClient::init_with_transports(config, Arc::new(EmptySyncListener), transport, fetcher)
            .await
            .expect("初始化客户端失败")
    }

    #[tokio::test]
    async fn test_offline_read_falls_back_to_cache() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fetcher = Arc::new(CountingFetcher::new(json!({"sectors": ["Digital Skills"]})));
        let transport = Arc::new(RecordingTransport {
            log: StdMutex::new(Vec::new()),
        });
        let client = test_client(&dir, fetcher.clone(), transport).await;

        // 在线刷新一次，填充缓存
        let entry = client.get_resource("lig_workers", "en", true).await?;
        assert!(entry.is_some());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        // 离线后即使要求刷新也不触碰网络，直接返回缓存
        client.network().set_online(false);
        let entry = client
            .get_resource("lig_workers", "en", true)
            .await?
            .expect("应命中本地缓存");
        assert_eq!(entry.data["sectors"][0], "Digital Skills");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        client.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_refresh_twice_updates_single_entry() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fetcher = Arc::new(CountingFetcher::new(json!({"sectors": []})));
        let transport = Arc::new(RecordingTransport {
            log: StdMutex::new(Vec::new()),
        });
        let client = test_client(&dir, fetcher.clone(), transport).await;

        let first = client
            .get_resource("lig_workers", "en", true)
            .await?
            .expect("首次刷新应有结果");
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = client
            .get_resource("lig_workers", "en", true)
            .await?
            .expect("二次刷新应有结果");

        assert_eq!(first.cache_key, second.cache_key);
        assert!(second.cached_at > first.cached_at);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

        // 刷新路径顺手把数据种到了工作者缓存
        assert!(client.worker().read_cached("lig_workers_en").await.is_some());

        client.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_failure_without_cache_propagates() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fetcher = Arc::new(FlakyFetcher {
            failing: std::sync::atomic::AtomicBool::new(true),
            data: json!({"sectors": ["Digital Skills"]}),
        });
        let transport = Arc::new(RecordingTransport {
            log: StdMutex::new(Vec::new()),
        });
        let client = test_client(&dir, fetcher.clone(), transport).await;

        // 在线、要求刷新、本地无缓存：拉取失败必须上抛，不能伪装成"无数据"
        let result = client.get_resource("lig_workers", "en", true).await;
        assert!(result.is_err());

        // 成功刷新一次填充缓存后，同样的失败改走缓存回退
        fetcher.failing.store(false, Ordering::SeqCst);
        assert!(client
            .get_resource("lig_workers", "en", true)
            .await?
            .is_some());

        fetcher.failing.store(true, Ordering::SeqCst);
        let entry = client
            .get_resource("lig_workers", "en", true)
            .await?
            .expect("应回退到本地缓存");
        assert_eq!(entry.data["sectors"][0], "Digital Skills");

        client.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_reconnect_triggers_background_drain() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fetcher = Arc::new(CountingFetcher::new(json!({})));
        let transport = Arc::new(RecordingTransport {
            log: StdMutex::new(Vec::new()),
        });
        let client = test_client(&dir, fetcher, transport.clone()).await;

        // 离线期间入队两条动作
        client.network().set_online(false);
        for label in ["first", "second"] {
            client
                .enqueue_action(&NewSyncAction {
                    url: format!("http://localhost/api/{}", label),
                    method: "POST".to_string(),
                    body: json!({"label": label}),
                    action_type: "test".to_string(),
                })
                .await?;
        }
        assert_eq!(client.pending_sync_count().await?, 2);

        // 网络恢复后后台任务应自动排空队列
        client.network().set_online(true);
        let mut drained = false;
        for _ in 0..100 {
            if client.pending_sync_count().await? == 0 {
                drained = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(drained, "重连后队列应被自动排空");
        assert_eq!(
            transport.log.lock().unwrap().clone(),
            vec!["http://localhost/api/first", "http://localhost/api/second"]
        );

        client.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_conversations_and_profile_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fetcher = Arc::new(CountingFetcher::new(json!({})));
        let transport = Arc::new(RecordingTransport {
            log: StdMutex::new(Vec::new()),
        });
        let client = test_client(&dir, fetcher, transport).await;

        let id1 = client
            .save_conversation(&json!({"query": "jobs", "response": "..."}), "en")
            .await?;
        let id2 = client
            .save_conversation(&json!({"query": "jobs", "response": "..."}), "en")
            .await?;
        assert!(id2 > id1);
        assert_eq!(client.get_conversations(Some("en"), 50).await?.len(), 2);

        client
            .save_profile("local-user", &json!({"district": "Shivamogga"}))
            .await?;
        let profile = client.get_profile("local-user").await?.expect("画像应存在");
        assert_eq!(profile.data["district"], "Shivamogga");

        // 工作者已注册，版本可查
        assert_eq!(client.query_worker_version().await.as_deref(), Some("2.0.0"));

        client.shutdown().await;
        Ok(())
    }
}

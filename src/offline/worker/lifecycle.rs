//! 工作者生命周期状态机
//!
//! 状态流转：Unregistered → Registering → Active → UpdateFound →
//! UpdateInstalled(waiting) → Activated。注册失败不致命，应用在没有
//! 离线能力的前提下继续运行。

use crate::offline::worker::script::{self, WorkerCommand};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// 工作者生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Unregistered,
    Registering,
    Active,
    UpdateFound,
    /// 新版本已安装完成，等待接管
    UpdateInstalled,
    /// 新版本已接管（硬切换，旧上下文被废弃）
    Activated,
}

/// 工作者事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
    /// 有新版本等待接管
    UpdateAvailable,
    /// 控制权已切换到新版本（对应页面重载语义）
    ControllerChanged,
}

/// 缓存种子投递结果
///
/// 无活跃工作者是被吞掉但可见的稳定态；真正的通道故障走 Err。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    Seeded,
    NoActiveWorker,
}

/// 活跃工作者句柄
struct WorkerHandle {
    version: String,
    tx: mpsc::Sender<WorkerCommand>,
}

/// 工作者生命周期管理器
pub struct WorkerLifecycle {
    state: Mutex<WorkerState>,
    active: Mutex<Option<WorkerHandle>>,
    waiting_version: Mutex<Option<String>>,
    update_available: AtomicBool,
    events_tx: broadcast::Sender<WorkerEvent>,
}

impl WorkerLifecycle {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(WorkerState::Unregistered),
            active: Mutex::new(None),
            waiting_version: Mutex::new(None),
            update_available: AtomicBool::new(false),
            events_tx,
        }
    }

    /// 当前状态
    pub fn state(&self) -> WorkerState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(WorkerState::Unregistered)
    }

    /// 是否有新版本等待接管
    pub fn update_available(&self) -> bool {
        self.update_available.load(Ordering::Relaxed)
    }

    /// 订阅工作者事件
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events_tx.subscribe()
    }

    /// 注册并启动指定版本的工作者
    ///
    /// 幂等：已有活跃工作者时重复注册是无操作成功。
    pub fn register(&self, version: &str) -> Result<()> {
        {
            let active = self
                .active
                .lock()
                .map_err(|_| anyhow::anyhow!("工作者句柄锁中毒"))?;
            if active.is_some() {
                debug!("[Worker] 已有活跃工作者，跳过注册");
                return Ok(());
            }
        }

        self.set_state(WorkerState::Registering);
        let handle = self.spawn_worker(version);

        if let Ok(mut active) = self.active.lock() {
            *active = Some(handle);
        }
        self.set_state(WorkerState::Active);
        info!("[Worker] ✅ 工作者 v{} 注册成功", version);
        Ok(())
    }

    fn spawn_worker(&self, version: &str) -> WorkerHandle {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(script::run(version.to_string(), rx));
        WorkerHandle {
            version: version.to_string(),
            tx,
        }
    }

    /// 宿主通知：发现新版本工作者开始安装
    pub fn notify_update_found(&self, version: &str) {
        info!("[Worker] 发现新版本工作者: v{}", version);
        if let Ok(mut waiting) = self.waiting_version.lock() {
            *waiting = Some(version.to_string());
        }
        self.set_state(WorkerState::UpdateFound);
    }

    /// 宿主通知：新版本安装完成
    ///
    /// 仅在已有活跃控制者时才视为"有更新可用"（首次安装不算更新）。
    pub fn notify_update_installed(&self) {
        let has_controller = self
            .active
            .lock()
            .map(|a| a.is_some())
            .unwrap_or(false);
        if !has_controller {
            debug!("[Worker] 无活跃控制者，新安装直接生效，不标记更新");
            return;
        }

        self.set_state(WorkerState::UpdateInstalled);
        self.update_available.store(true, Ordering::Relaxed);
        info!("[Worker] 🆕 新版本已安装，等待接管");
        let _ = self.events_tx.send(WorkerEvent::UpdateAvailable);
    }

    /// 应用更新：向旧工作者发 skip-waiting，硬切换到等待中的新版本
    ///
    /// 旧上下文中的在途操作按设计被废弃（页面重载语义）。
    /// 无等待中的版本时是无操作成功。
    pub async fn apply_update(&self) -> Result<()> {
        let waiting = self
            .waiting_version
            .lock()
            .ok()
            .and_then(|mut w| w.take());
        let Some(new_version) = waiting else {
            warn!("[Worker] 无等待中的新版本，跳过更新");
            return Ok(());
        };

        // 取出旧句柄后再 await，不跨 await 持锁
        let old = self
            .active
            .lock()
            .ok()
            .and_then(|mut active| active.take());
        if let Some(old) = old {
            if old.tx.send(WorkerCommand::SkipWaiting).await.is_err() {
                warn!("[Worker] 旧工作者 v{} 已退出", old.version);
            }
        }

        let handle = self.spawn_worker(&new_version);
        if let Ok(mut active) = self.active.lock() {
            *active = Some(handle);
        }
        self.update_available.store(false, Ordering::Relaxed);
        self.set_state(WorkerState::Activated);
        info!("[Worker] 🔄 已切换到工作者 v{}", new_version);
        let _ = self.events_tx.send(WorkerEvent::ControllerChanged);
        Ok(())
    }

    /// 查询活跃工作者版本
    ///
    /// 无活跃工作者或通道已断开时返回 None。
    pub async fn query_version(&self) -> Option<String> {
        let tx = self.active_tx()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(WorkerCommand::GetVersion { reply: reply_tx })
            .await
            .ok()?;
        reply_rx.await.ok()
    }

    /// 尽力而为地向工作者投递一条响应缓存种子
    ///
    /// 无活跃工作者时吞掉并返回 NoActiveWorker（可调试、不致命）；
    /// 通道断开是真实故障，走 Err。
    pub async fn cache_payload(&self, key: &str, data: serde_json::Value) -> Result<SeedOutcome> {
        let Some(tx) = self.active_tx() else {
            debug!("[Worker] 无活跃工作者，缓存种子被忽略: key={}", key);
            return Ok(SeedOutcome::NoActiveWorker);
        };

        tx.send(WorkerCommand::CachePayload {
            key: key.to_string(),
            data,
        })
        .await
        .map_err(|_| anyhow::anyhow!("工作者命令通道已断开"))?;
        Ok(SeedOutcome::Seeded)
    }

    /// 从工作者缓存读取条目
    pub async fn read_cached(&self, key: &str) -> Option<serde_json::Value> {
        let tx = self.active_tx()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(WorkerCommand::ReadCached {
            key: key.to_string(),
            reply: reply_tx,
        })
        .await
        .ok()?;
        reply_rx.await.ok().flatten()
    }

    /// 停止活跃工作者
    pub async fn shutdown(&self) {
        let old = self
            .active
            .lock()
            .ok()
            .and_then(|mut active| active.take());
        if let Some(old) = old {
            let _ = old.tx.send(WorkerCommand::SkipWaiting).await;
            info!("[Worker] 工作者 v{} 已停止", old.version);
        }
        self.set_state(WorkerState::Unregistered);
    }

    fn active_tx(&self) -> Option<mpsc::Sender<WorkerCommand>> {
        self.active
            .lock()
            .ok()
            .and_then(|active| active.as_ref().map(|h| h.tx.clone()))
    }

    fn set_state(&self, state: WorkerState) {
        if let Ok(mut s) = self.state.lock() {
            *s = state;
        }
    }
}

impl Default for WorkerLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

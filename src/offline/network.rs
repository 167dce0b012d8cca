//! 网络与安装状态监视器
//!
//! 维护在线标志与安装状态，全部由宿主事件驱动，不做轮询；
//! 宿主不派发事件时状态可能过期，这是接受的限制。
//! 离线转在线时向订阅方广播重连信号，由同步调度器消费。

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// 网络事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    /// 离线转在线（触发待同步队列排水）
    Reconnected,
    /// 在线转离线
    WentOffline,
    /// 应用已被宿主安装
    Installed,
}

/// 安装提示句柄（宿主捕获 beforeinstallprompt 后注入）
#[async_trait]
pub trait InstallPrompt: Send + Sync {
    /// 向用户弹出安装提示，返回用户是否接受
    async fn prompt(&self) -> bool;
}

/// 网络与安装状态监视器
pub struct NetworkMonitor {
    online_tx: watch::Sender<bool>,
    events_tx: broadcast::Sender<NetworkEvent>,
    installed: AtomicBool,
    deferred_prompt: Mutex<Option<Box<dyn InstallPrompt>>>,
}

impl NetworkMonitor {
    /// 创建监视器，initial_online 为宿主启动时的连通状态
    pub fn new(initial_online: bool) -> Self {
        let (online_tx, _) = watch::channel(initial_online);
        let (events_tx, _) = broadcast::channel(16);
        Self {
            online_tx,
            events_tx,
            installed: AtomicBool::new(false),
            deferred_prompt: Mutex::new(None),
        }
    }

    /// 当前是否在线
    pub fn is_online(&self) -> bool {
        *self.online_tx.borrow()
    }

    /// 是否有已捕获、尚未使用的安装提示
    pub fn is_installable(&self) -> bool {
        self.deferred_prompt
            .lock()
            .map(|p| p.is_some())
            .unwrap_or(false)
    }

    /// 应用是否已安装
    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Relaxed)
    }

    /// 订阅网络事件
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events_tx.subscribe()
    }

    /// 观察在线标志（watch 通道，供需要等待状态变化的调用方）
    pub fn watch_online(&self) -> watch::Receiver<bool> {
        self.online_tx.subscribe()
    }

    /// 宿主连通性事件入口
    ///
    /// 只有真正的离线转在线才广播 Reconnected，重复的在线通知不会重复触发。
    pub fn set_online(&self, online: bool) {
        let was_online = *self.online_tx.borrow();
        if was_online == online {
            debug!("[NetMon] 连通状态未变化，忽略: online={}", online);
            return;
        }

        self.online_tx.send_replace(online);
        if online {
            info!("[NetMon] 📡 网络恢复在线，广播重连信号");
            // 无订阅者时发送失败是正常状态
            let _ = self.events_tx.send(NetworkEvent::Reconnected);
        } else {
            info!("[NetMon] 网络离线，改用本地缓存");
            let _ = self.events_tx.send(NetworkEvent::WentOffline);
        }
    }

    /// 捕获宿主提供的安装提示
    pub fn capture_install_prompt(&self, prompt: Box<dyn InstallPrompt>) {
        info!("[NetMon] 已捕获安装提示");
        if let Ok(mut slot) = self.deferred_prompt.lock() {
            *slot = Some(prompt);
        }
    }

    /// 宿主通知应用已安装
    pub fn mark_installed(&self) {
        info!("[NetMon] ✅ 应用安装完成");
        self.installed.store(true, Ordering::Relaxed);
        if let Ok(mut slot) = self.deferred_prompt.lock() {
            *slot = None;
        }
        let _ = self.events_tx.send(NetworkEvent::Installed);
    }

    /// 触发安装提示
    ///
    /// 无已捕获的提示时静默返回 false（稳定态，不是错误）。
    /// 无论用户是否接受，提示都只能使用一次。
    pub async fn prompt_install(&self) -> bool {
        let prompt = match self.deferred_prompt.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(prompt) = prompt else {
            debug!("[NetMon] 无可用安装提示");
            return false;
        };

        let accepted = prompt.prompt().await;
        info!(
            "[NetMon] 安装提示结果: {}",
            if accepted { "接受" } else { "拒绝" }
        );
        if accepted {
            self.installed.store(true, Ordering::Relaxed);
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AcceptingPrompt;

    #[async_trait]
    impl InstallPrompt for AcceptingPrompt {
        async fn prompt(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_reconnect_emits_once_per_transition() {
        let monitor = NetworkMonitor::new(true);
        let mut events = monitor.subscribe();

        // 已在线时重复通知在线，不应产生事件
        monitor.set_online(true);
        monitor.set_online(false);
        monitor.set_online(true);
        monitor.set_online(true);

        assert_eq!(events.recv().await.unwrap(), NetworkEvent::WentOffline);
        assert_eq!(events.recv().await.unwrap(), NetworkEvent::Reconnected);
        assert!(events.try_recv().is_err());
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn test_prompt_install_without_prompt_is_false() {
        let monitor = NetworkMonitor::new(false);
        assert!(!monitor.is_installable());
        assert!(!monitor.prompt_install().await);
    }

    #[tokio::test]
    async fn test_prompt_install_consumes_prompt() {
        let monitor = NetworkMonitor::new(true);
        monitor.capture_install_prompt(Box::new(AcceptingPrompt));
        assert!(monitor.is_installable());

        assert!(monitor.prompt_install().await);
        assert!(monitor.is_installed());
        // 提示是一次性的
        assert!(!monitor.is_installable());
        assert!(!monitor.prompt_install().await);
    }
}

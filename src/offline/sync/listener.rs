//! 同步过程回调接口

use crate::offline::sync::dispatcher::SyncReport;
use async_trait::async_trait;

/// 同步监听器回调接口
#[async_trait]
pub trait SyncListener: Send + Sync {
    /// 一轮排水开始，total 为本轮将尝试的动作数
    async fn on_sync_start(&self, total: usize);

    /// 某条动作确认送达并已出队
    async fn on_action_delivered(&self, action_id: i64);

    /// 某条动作本轮未送达，留在队列中等待下一轮
    async fn on_action_kept(&self, action_id: i64, dead: bool);

    /// 一轮排水结束
    async fn on_sync_finish(&self, report: &SyncReport);
}

/// 空实现（默认监听器）
pub struct EmptySyncListener;

#[async_trait]
impl SyncListener for EmptySyncListener {
    async fn on_sync_start(&self, _total: usize) {}
    async fn on_action_delivered(&self, _action_id: i64) {}
    async fn on_action_kept(&self, _action_id: i64, _dead: bool) {}
    async fn on_sync_finish(&self, _report: &SyncReport) {}
}

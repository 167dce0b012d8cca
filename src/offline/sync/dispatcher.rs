//! 同步调度器
//!
//! 网络恢复或显式调用时按创建顺序（FIFO）排空待同步队列：
//! 每条动作一轮只尝试一次，2xx 才出队，其余情况原地保留，
//! 单条失败不阻塞后续条目。队列本身就是重试机制，至少一次投递；
//! 非幂等请求的去重是远端的责任（幂等键）。

use crate::offline::models::{NewSyncAction, PendingSyncAction};
use crate::offline::store::SyncQueueDao;
use crate::offline::sync::listener::{EmptySyncListener, SyncListener};
use crate::offline::sync::transport::{DeliveryStatus, SyncTransport};
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// 默认最大尝试次数，超过后标记死信
pub const DEFAULT_MAX_ATTEMPTS: i32 = 10;

/// 单条动作的本轮结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// 确认送达，已出队
    Delivered,
    /// 远端拒绝（非 2xx），保留待重试
    Rejected(u16),
    /// 未到达远端（网络故障），保留待重试
    Failed,
    /// 死信条目，本轮跳过
    Skipped,
}

/// 一条动作的本轮尝试记录
#[derive(Debug, Clone)]
pub struct SyncAttempt {
    pub action: PendingSyncAction,
    pub outcome: SyncOutcome,
}

/// 一轮排水的汇总
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub attempts: Vec<SyncAttempt>,
    pub delivered: usize,
    pub kept: usize,
    pub dead_lettered: usize,
}

/// 同步调度器
pub struct SyncDispatcher {
    queue: SyncQueueDao,
    transport: Arc<dyn SyncTransport>,
    listener: Arc<dyn SyncListener>,
    max_attempts: i32,
}

impl SyncDispatcher {
    pub fn new(queue: SyncQueueDao, transport: Arc<dyn SyncTransport>) -> Self {
        Self::with_listener(queue, transport, Arc::new(EmptySyncListener))
    }

    pub fn with_listener(
        queue: SyncQueueDao,
        transport: Arc<dyn SyncTransport>,
        listener: Arc<dyn SyncListener>,
    ) -> Self {
        Self {
            queue,
            transport,
            listener,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// 覆盖死信阈值
    pub fn set_max_attempts(&mut self, max_attempts: i32) {
        self.max_attempts = max_attempts;
    }

    /// 入队一条待同步动作，返回分配的 ID
    pub async fn enqueue(&self, action: &NewSyncAction) -> Result<i64> {
        self.queue.enqueue(action).await
    }

    /// 队列中待投递动作数量（不含死信）
    pub async fn pending_count(&self) -> Result<i64> {
        self.queue.count().await
    }

    /// 排空待同步队列（跳过死信条目）
    pub async fn drain(&self) -> Result<SyncReport> {
        self.drain_inner(false).await
    }

    /// 排空待同步队列，死信条目也列入报告（结果为 Skipped）
    pub async fn drain_including_dead(&self) -> Result<SyncReport> {
        self.drain_inner(true).await
    }

    async fn drain_inner(&self, include_dead: bool) -> Result<SyncReport> {
        let actions = self.queue.pending_in_order(include_dead).await?;
        if actions.is_empty() {
            return Ok(SyncReport::default());
        }

        info!("[SyncDisp] 🔄 开始排空待同步队列，共 {} 条", actions.len());
        self.listener.on_sync_start(actions.len()).await;

        let mut report = SyncReport::default();
        for action in actions {
            if action.dead {
                report.attempts.push(SyncAttempt {
                    action,
                    outcome: SyncOutcome::Skipped,
                });
                continue;
            }

            // 一轮一次：失败不在本轮重试，留到下一轮
            let outcome = match self.transport.deliver(&action).await {
                Ok(DeliveryStatus::Delivered) => {
                    self.queue.delete(action.id).await?;
                    self.listener.on_action_delivered(action.id).await;
                    report.delivered += 1;
                    SyncOutcome::Delivered
                }
                Ok(DeliveryStatus::Rejected(status)) => {
                    let dead = self.queue.record_failure(action.id, self.max_attempts).await?;
                    self.listener.on_action_kept(action.id, dead).await;
                    report.kept += 1;
                    if dead {
                        report.dead_lettered += 1;
                    }
                    SyncOutcome::Rejected(status)
                }
                Err(e) => {
                    warn!("[SyncDisp] 动作 {} 投递失败，保留待重试: {}", action.id, e);
                    let dead = self.queue.record_failure(action.id, self.max_attempts).await?;
                    self.listener.on_action_kept(action.id, dead).await;
                    report.kept += 1;
                    if dead {
                        report.dead_lettered += 1;
                    }
                    SyncOutcome::Failed
                }
            };
            report.attempts.push(SyncAttempt { action, outcome });
        }

        info!(
            "[SyncDisp] ✅ 排空完成 - 送达: {}, 保留: {}, 新增死信: {}",
            report.delivered, report.kept, report.dead_lettered
        );
        self.listener.on_sync_finish(&report).await;
        Ok(report)
    }
}

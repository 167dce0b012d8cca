//! 同步投递传输层
//!
//! 队列对传输是无感的：动作携带完整的 url/method/body，
//! 这里只负责把单条动作发出去并报告结果。

use crate::offline::models::PendingSyncAction;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

/// 单次投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// 远端确认接收（2xx）
    Delivered,
    /// 远端拒绝（非 2xx 状态码）
    Rejected(u16),
}

/// 投递传输接口
///
/// 返回 Err 表示请求根本没有到达远端（网络故障、超时）；
/// 到达但被拒绝用 Rejected 表达。两者都让动作留在队列里。
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn deliver(&self, action: &PendingSyncAction) -> Result<DeliveryStatus>;
}

/// 基于 reqwest 的 HTTP 传输
pub struct HttpSyncTransport {
    client: reqwest::Client,
}

impl HttpSyncTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn deliver(&self, action: &PendingSyncAction) -> Result<DeliveryStatus> {
        let operation_id = Uuid::new_v4().to_string();
        let method: reqwest::Method = action
            .method
            .parse()
            .with_context(|| format!("非法的 HTTP 方法: {}", action.method))?;

        debug!(
            "[SyncTransport] 投递动作 {}: {} {}, 操作ID: {}",
            action.id, action.method, action.url, operation_id
        );

        let response = self
            .client
            .request(method, &action.url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(&action.body)
            .send()
            .await
            .context("请求失败")?;

        let status = response.status();
        if status.is_success() {
            Ok(DeliveryStatus::Delivered)
        } else {
            warn!(
                "[SyncTransport] 动作 {} 被远端拒绝，HTTP状态: {}",
                action.id, status
            );
            Ok(DeliveryStatus::Rejected(status.as_u16()))
        }
    }
}

//! 远端资源 HTTP API 客户端
//!
//! 按类别+语言拉取职业指导资源数据；响应 JSON 原样返回，
//! 由调用方整体写入资源缓存。

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, error, info};
use uuid::Uuid;

/// 远端资源拉取接口
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// 拉取一份资源，返回未解释的 JSON
    async fn fetch(&self, category: &str, language: &str) -> Result<serde_json::Value>;
}

/// 基于 reqwest 的资源 API 客户端
pub struct HttpResourceFetcher {
    client: reqwest::Client,
    api_base_url: String,
}

impl HttpResourceFetcher {
    /// `client` 应该已经在外部配置好请求超时
    pub fn new(client: reqwest::Client, api_base_url: String) -> Self {
        Self {
            client,
            api_base_url,
        }
    }
}

#[async_trait]
impl ResourceFetcher for HttpResourceFetcher {
    async fn fetch(&self, category: &str, language: &str) -> Result<serde_json::Value> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}/api/career-data", self.api_base_url);

        info!("[ResAPI] 📡 拉取远端资源: category={}, language={}", category, language);
        debug!("[ResAPI]   请求URL: {}, 操作ID: {}", url, operation_id);

        let response = self
            .client
            .get(&url)
            .query(&[("category", category), ("language", language)])
            .header("operationID", &operation_id)
            .send()
            .await
            .context("请求失败")?;

        let status = response.status();
        let body_bytes = response.bytes().await.context("读取响应 body 失败")?;

        if !status.is_success() {
            let body_str = String::from_utf8_lossy(&body_bytes);
            error!(
                "[ResAPI] 资源请求失败，HTTP状态: {}, 响应: {}",
                status, body_str
            );
            return Err(anyhow::anyhow!("HTTP 错误 {}: {}", status, body_str));
        }

        let data: serde_json::Value = serde_json::from_slice(&body_bytes).map_err(|e| {
            error!(
                "[ResAPI] 资源响应反序列化失败: {:?}\n原始响应: {}",
                e,
                String::from_utf8_lossy(&body_bytes)
            );
            anyhow::anyhow!("反序列化响应失败: {:?}", e)
        })?;

        info!("[ResAPI] ✅ 资源拉取成功: category={}, language={}", category, language);
        Ok(data)
    }
}

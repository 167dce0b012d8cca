//! 离线存储本地模型定义
//!
//! 四个集合的记录结构，可直接与 JSON 互转，缺失字段使用默认值。

use serde::{Deserialize, Serialize};

/// 对话记录（追加写入，永不修改、永不删除）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    /// 自增 ID（入库时分配）
    pub id: i64,
    /// 一次用户/助手交互的自由格式内容
    pub payload: serde_json::Value,
    /// 语言代码（en / te / kn / hi ...）
    pub language: String,
    /// 入库时间（epoch 毫秒）
    pub timestamp: i64,
}

/// 资源缓存条目（按 key 覆盖写，最后写入者胜出）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCacheEntry {
    /// 缓存键，固定为 `{category}_{language}`
    pub cache_key: String,
    /// 资源类别
    pub category: String,
    /// 语言代码
    pub language: String,
    /// 服务器返回的 JSON，原样存取
    pub data: serde_json::Value,
    /// 缓存时间（epoch 毫秒）
    pub cached_at: i64,
}

impl ResourceCacheEntry {
    /// 由类别和语言构造缓存键（唯一性由构造保证，upsert 天然幂等）
    pub fn make_key(category: &str, language: &str) -> String {
        format!("{}_{}", category, language)
    }
}

/// 用户画像记录（每个安装一条逻辑行，由调用方驱动更新）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfileRecord {
    /// 画像 ID
    pub id: String,
    /// 画像内容（自由格式 JSON）
    #[serde(default)]
    pub data: serde_json::Value,
    /// 最后更新时间（epoch 毫秒）
    #[serde(default)]
    pub updated_at: i64,
}

/// 待同步动作（仅在确认送达后删除，至少一次投递）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSyncAction {
    /// 自增 ID（入队时分配，排水按此 FIFO）
    pub id: i64,
    /// 目标 URL
    pub url: String,
    /// HTTP 方法
    pub method: String,
    /// 请求体（JSON）
    pub body: serde_json::Value,
    /// 业务类型标签
    pub action_type: String,
    /// 入队时间（epoch 毫秒）
    pub created_at: i64,
    /// 已失败的投递次数
    #[serde(default)]
    pub attempts: i32,
    /// 死信标记：超过最大尝试次数后置位，排水时跳过
    #[serde(default)]
    pub dead: bool,
}

/// 入队用的新动作（ID 与时间戳由存储层分配）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSyncAction {
    pub url: String,
    pub method: String,
    pub body: serde_json::Value,
    pub action_type: String,
}

/// 存储用量估算
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEstimate {
    /// 已用字节数
    pub used_bytes: u64,
    /// 配额字节数
    pub quota_bytes: u64,
    /// 已用百分比（0-100）
    pub percentage: u8,
}

/// 当前 epoch 毫秒时间戳
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

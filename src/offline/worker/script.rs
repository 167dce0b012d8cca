//! 后台缓存工作者任务体
//!
//! 独立于调用方运行的命令循环：应答版本查询、接收缓存种子、
//! 提供缓存读取。安装时预置多语言的离线兜底指引。

use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// 页面发往工作者的命令（postMessage 协议的类型化形式）
#[derive(Debug)]
pub enum WorkerCommand {
    /// 查询工作者版本，经 oneshot 应答
    GetVersion { reply: oneshot::Sender<String> },
    /// 接收一条响应缓存种子
    CachePayload { key: String, data: serde_json::Value },
    /// 读取缓存条目
    ReadCached {
        key: String,
        reply: oneshot::Sender<Option<serde_json::Value>>,
    },
    /// skip-waiting：立即停止，让位给新版本工作者
    SkipWaiting,
}

/// 安装时预置的离线兜底指引（按语言各一条）
fn builtin_seeds() -> Vec<(String, serde_json::Value)> {
    let entries = [
        (
            "en",
            "I can help with career options, government schemes and skill development even offline.",
        ),
        (
            "hi",
            "मैं ऑफ़लाइन भी करियर विकल्प, सरकारी योजनाओं और कौशल विकास में मदद कर सकता हूँ।",
        ),
        (
            "te",
            "ఆఫ్‌లైన్‌లో కూడా కెరీర్ ఎంపికలు, ప్రభుత్వ పథకాలు, నైపుణ్య అభివృద్ధిలో సహాయం చేయగలను.",
        ),
        (
            "kn",
            "ಆಫ್‌ಲೈನ್‌ನಲ್ಲಿಯೂ ವೃತ್ತಿ ಆಯ್ಕೆಗಳು, ಸರ್ಕಾರಿ ಯೋಜನೆಗಳು ಮತ್ತು ಕೌಶಲ್ಯ ಅಭಿವೃದ್ಧಿಯಲ್ಲಿ ಸಹಾಯ ಮಾಡಬಲ್ಲೆ.",
        ),
    ];
    entries
        .into_iter()
        .map(|(lang, text)| {
            (
                format!("guidance_{}", lang),
                serde_json::json!({ "language": lang, "response": text, "isCached": true }),
            )
        })
        .collect()
}

/// 工作者主循环
///
/// 通道关闭或收到 SkipWaiting 后退出；退出即对应旧页面上下文被废弃。
pub async fn run(version: String, mut rx: mpsc::Receiver<WorkerCommand>) {
    let mut cache: HashMap<String, serde_json::Value> = builtin_seeds().into_iter().collect();
    info!(
        "[WorkerScript] 工作者 v{} 启动，预置缓存 {} 条",
        version,
        cache.len()
    );

    while let Some(cmd) = rx.recv().await {
        match cmd {
            WorkerCommand::GetVersion { reply } => {
                let _ = reply.send(version.clone());
            }
            WorkerCommand::CachePayload { key, data } => {
                debug!("[WorkerScript] 接收缓存种子: key={}", key);
                cache.insert(key, data);
            }
            WorkerCommand::ReadCached { key, reply } => {
                let _ = reply.send(cache.get(&key).cloned());
            }
            WorkerCommand::SkipWaiting => {
                info!("[WorkerScript] 收到 skip-waiting，工作者 v{} 退出", version);
                break;
            }
        }
    }
    debug!("[WorkerScript] 工作者 v{} 结束", version);
}

//! 离线客户端 CLI（测试版）
//!
//! 非交互式 CLI，用于测试和展示离线优先数据层的完整流程：
//! 离线写入、断网排队、网络恢复后自动补投、存储用量估算

use anyhow::Result;
use clap::Parser;
use hiai_offline_core_rust::offline::client::{ClientConfig, OfflineClient};
use hiai_offline_core_rust::offline::models::NewSyncAction;
use hiai_offline_core_rust::offline::sync::{SyncListener, SyncReport};
use serde_json::json;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::info;

/// 离线客户端 CLI
#[derive(Parser, Debug)]
#[command(name = "hiai-offline-cli")]
#[command(about = "离线客户端 CLI - 用于测试和展示离线数据层功能", long_about = None)]
struct Args {
    /// 数据库路径（默认: offline.db）
    #[arg(short, long, default_value = "offline.db")]
    db_path: String,

    /// API 基础 URL
    #[arg(short, long, default_value = "http://localhost:10002")]
    api_base_url: String,

    /// 资源语言（en/hi/te/kn）
    #[arg(short, long, default_value = "en")]
    language: String,

    /// 日志级别（默认: info,hiai_offline_core_rust=debug）
    #[arg(long, default_value = "info,hiai_offline_core_rust=debug")]
    log_level: String,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // 创建日志文件（追加模式）
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("无法创建日志文件 debug.log");

    // 输出到 stdout（控制台），保留 ANSI 颜色代码用于终端显示
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 输出到文件，禁用 ANSI 颜色代码（文件不需要颜色）
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
}

/// 同步监听器（输出每一步投递结果）
struct CliSyncListener;

#[async_trait::async_trait]
impl SyncListener for CliSyncListener {
    async fn on_sync_start(&self, total: usize) {
        info!("[CLI/Sync] 🔄 同步开始: 待投递 {} 条", total);
    }

    async fn on_action_delivered(&self, action_id: i64) {
        info!("[CLI/Sync] ✅ 动作已投递: id={}", action_id);
    }

    async fn on_action_kept(&self, action_id: i64, dead: bool) {
        if dead {
            info!("[CLI/Sync] ⚠️ 动作进入死信: id={}", action_id);
        } else {
            info!("[CLI/Sync] 🔄 动作保留待重试: id={}", action_id);
        }
    }

    async fn on_sync_finish(&self, report: &SyncReport) {
        info!(
            "[CLI/Sync] ✅ 同步完成: 投递={} 保留={} 死信={}",
            report.delivered, report.kept, report.dead_lettered
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    init_logger(&args.log_level);

    info!("[CLI] 🚀 离线客户端 CLI（测试模式）");
    info!("[CLI] 💾 数据库: {}", args.db_path);
    info!("[CLI] 🌐 API: {}", args.api_base_url);

    // 初始化客户端
    let config = ClientConfig::new(args.db_path.clone(), args.api_base_url.clone());
    let client = OfflineClient::init_with_listener(config, Arc::new(CliSyncListener)).await?;
    info!("[CLI] ✅ 客户端初始化完成");

    if let Some(version) = client.query_worker_version().await {
        info!("[CLI] 🔧 后台工作者版本: {}", version);
    }

    // 写一条对话记录（纯本地，不上传）
    let conv_id = client
        .save_conversation(
            &json!({
                "query": "有哪些适合我的数字技能方向？",
                "response": "可以先从数据录入和基础办公软件开始。"
            }),
            &args.language,
        )
        .await?;
    info!("[CLI] 💬 对话已保存: id={}", conv_id);

    let conversations = client.get_conversations(Some(&args.language), 50).await?;
    info!("[CLI] 📋 对话记录（共 {} 条）", conversations.len());

    // 在线刷新一次职业资源，之后断网验证缓存回退
    match client
        .get_resource("lig_workers", &args.language, true)
        .await?
    {
        Some(entry) => info!("[CLI] 📦 资源已缓存: key={}", entry.cache_key),
        None => info!("[CLI] 📦 远端不可达且本地无缓存（首次离线运行属正常）"),
    }

    // 模拟断网：入队一条动作，验证离线排队
    info!("[CLI] 📡 模拟断网...");
    client.network().set_online(false);

    let action_id = client
        .enqueue_action(&NewSyncAction {
            url: format!("{}/api/analytics", args.api_base_url),
            method: "POST".to_string(),
            body: json!({"event": "cli_demo", "language": args.language}),
            action_type: "analytics".to_string(),
        })
        .await?;
    info!(
        "[CLI] 📮 动作已入队: id={}, 队列长度={}",
        action_id,
        client.pending_sync_count().await?
    );

    // 断网期间读取仍然命中本地缓存
    let offline_read = client
        .get_resource("lig_workers", &args.language, true)
        .await?;
    info!(
        "[CLI] 📦 离线读取: {}",
        if offline_read.is_some() {
            "命中本地缓存"
        } else {
            "无缓存"
        }
    );

    // 模拟网络恢复：后台任务自动排空队列
    info!("[CLI] 📡 模拟网络恢复...");
    client.network().set_online(true);
    sleep(Duration::from_secs(2)).await;
    info!(
        "[CLI] 📮 恢复后队列长度: {}",
        client.pending_sync_count().await?
    );

    // 存储用量
    if let Some(estimate) = client.estimate_usage().await {
        info!(
            "[CLI] 💾 存储用量: {} / {} 字节（{}%）",
            estimate.used_bytes, estimate.quota_bytes, estimate.percentage
        );
    }
    info!(
        "[CLI] 💾 持久化存储: {}",
        if client.request_persistence().await {
            "已授予"
        } else {
            "被拒绝（正常结果）"
        }
    );

    client.shutdown().await;
    info!("[CLI] 👋 程序退出");
    Ok(())
}

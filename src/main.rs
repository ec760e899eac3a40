//! Memobot - 群聊 AI 助手
//!
//! 入口：初始化日志、加载配置，并连接聊天平台运行至退出。

use anyhow::Context;
use memobot::config::{load_config, AppConfig};
use memobot::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    // 可选参数：额外的配置文件路径
    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    run(cfg).await
}

#[cfg(feature = "discord")]
async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    memobot::integrations::discord::run(cfg).await
}

#[cfg(not(feature = "discord"))]
async fn run(_cfg: AppConfig) -> anyhow::Result<()> {
    anyhow::bail!("no chat platform enabled, rebuild with --features discord")
}

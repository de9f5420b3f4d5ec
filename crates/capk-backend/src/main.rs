use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use capk_backend::{config, Backend};

/// 持有 kind 集群的后端进程
#[derive(Parser, Debug)]
#[command(name = "capk-backend", version, about)]
struct Args {
    /// 配置文件路径（YAML 或 JSON）
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = config::load_config(args.config.as_deref()).context("加载配置失败")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("启动 CAPK 后端，kind 可执行文件: {}", config.kind.binary);

    Backend::new(config)
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("收到退出信号，正在停止");
        })
        .await
}

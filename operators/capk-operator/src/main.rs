use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use capk_common::KindCluster;
use capk_operator::{config, KindClusterOperator};

/// Cluster API kind 基础设施提供者
#[derive(Parser, Debug)]
#[command(name = "capk-operator", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 运行控制器与准入校验服务
    Run {
        /// 配置文件路径（YAML 或 JSON）
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// 输出 KindCluster CRD
    Crd,
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Crd => {
            print!("{}", serde_yaml::to_string(&KindCluster::crd()).context("序列化 CRD 失败")?);
            Ok(())
        }
        Command::Run { config } => run(config).await,
    }
}

async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config = config::load_config(config_path.as_deref()).context("加载配置失败")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let operator = KindClusterOperator::new(config).await?;
    operator.start().await?;

    let _ = tokio::signal::ctrl_c().await;
    info!("收到退出信号，正在停止");

    operator.stop().await
}

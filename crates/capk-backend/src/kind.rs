//! kind 命令行后端
//!
//! 通过调用 kind 可执行文件实现集群后端接口。所有命令异步执行，
//! 失败时把 stderr 带回给调用方。

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use capk_common::{BackendError, BackendResult, ClusterBackend, KindCluster, KindConfig};

use crate::config::KindCliConfig;

/// kind 命令行后端
pub struct KindCli {
    /// kind 可执行文件
    binary: String,
    /// 创建时等待就绪的时间
    create_wait: Duration,
    /// kind 写入的 kubeconfig 路径
    kubeconfig_path: PathBuf,
}

impl KindCli {
    /// 创建新的 kind 后端
    pub fn new(config: &KindCliConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            create_wait: Duration::from_secs(config.create_wait_seconds),
            kubeconfig_path: config.kubeconfig_path(),
        }
    }

    /// 执行 kind 命令并返回 stdout
    async fn run(&self, args: &[String], stdin: Option<String>) -> BackendResult<String> {
        debug!("执行 {} {}", self.binary, args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::Command(format!("无法启动 {}: {}", self.binary, e)))?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes())
                    .await
                    .map_err(|e| BackendError::Command(format!("写入 stdin 失败: {}", e)))?;
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| BackendError::Command(format!("等待 {} 退出失败: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::Command(format!(
                "{} {} 失败: {}",
                self.binary,
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// 列出 kind 中已存在的集群
    async fn list_clusters(&self) -> BackendResult<Vec<String>> {
        let output = self.run(&args(&["get", "clusters"]), None).await?;
        Ok(parse_cluster_list(&output))
    }

    fn kubeconfig_arg(&self) -> String {
        self.kubeconfig_path.to_string_lossy().into_owned()
    }
}

#[async_trait]
impl ClusterBackend for KindCli {
    async fn create(&self, cluster: &KindCluster, config: &KindConfig) -> BackendResult<()> {
        let name = cluster.backend_name();
        let document = config
            .to_yaml()
            .map_err(|e| BackendError::Command(format!("生成 kind 配置失败: {}", e)))?;

        info!("创建 kind 集群 {}（{} 个控制平面节点）", name, config.nodes.len());

        let wait = format!("{}s", self.create_wait.as_secs());
        let kubeconfig = self.kubeconfig_arg();
        self.run(
            &args(&[
                "create",
                "cluster",
                "--name",
                &name,
                "--config",
                "-",
                "--wait",
                &wait,
                "--kubeconfig",
                &kubeconfig,
            ]),
            Some(document),
        )
        .await?;

        info!("kind 集群 {} 创建完成", name);
        Ok(())
    }

    async fn is_ready(&self, name: &str) -> BackendResult<bool> {
        Ok(self.list_clusters().await?.iter().any(|c| c == name))
    }

    async fn kubeconfig(&self, name: &str) -> BackendResult<String> {
        self.run(&args(&["get", "kubeconfig", "--name", name]), None)
            .await
    }

    async fn delete(&self, name: &str) -> BackendResult<()> {
        if !self.list_clusters().await?.iter().any(|c| c == name) {
            return Err(BackendError::NotFound(name.to_string()));
        }

        info!("删除 kind 集群 {}", name);
        let kubeconfig = self.kubeconfig_arg();
        self.run(
            &args(&["delete", "cluster", "--name", name, "--kubeconfig", &kubeconfig]),
            None,
        )
        .await?;

        Ok(())
    }
}

/// 解析 `kind get clusters` 的输出
pub fn parse_cluster_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

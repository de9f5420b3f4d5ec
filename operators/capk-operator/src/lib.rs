//! CAPK Operator - 用 kind 管理本地集群的 Cluster API 基础设施提供者
//!
//! 该模块实现了 KindCluster 的 Kubernetes Operator：协调器驱动集群的创建、
//! 状态刷新与删除，准入校验服务保证 spec 创建后不可修改。

pub mod backend_client;
pub mod config;
pub mod controller;
pub mod reconcile;
pub mod store;
pub mod webhook;

use anyhow::{Context, Result};
use kube::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use capk_common::ClusterBackend;

/// Operator 主结构体
pub struct KindClusterOperator {
    /// 配置
    config: config::OperatorConfig,
    /// Kubernetes 客户端
    client: Client,
    /// 停止信号
    shutdown: watch::Sender<bool>,
    /// 后台任务
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl KindClusterOperator {
    /// 创建新的 Operator 实例
    pub async fn new(config: config::OperatorConfig) -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("创建 Kubernetes 客户端失败")?;
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            client,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// 启动 Operator
    pub async fn start(&self) -> Result<()> {
        let backend: Arc<dyn ClusterBackend> = Arc::new(backend_client::HttpBackend::new(
            &self.config.backend.host,
            self.config.backend.port,
        ));
        let store = Arc::new(store::KubeStore::new(self.client.clone()));
        let reconciler = Arc::new(reconcile::Reconciler::new(
            store,
            backend,
            self.config.reconcile.settings(),
        ));

        info!(
            "后端地址: {}:{}",
            self.config.backend.host, self.config.backend.port
        );

        let mut tasks = self.tasks.lock().await;

        if self.config.webhook.enabled {
            let addr: SocketAddr = format!(
                "{}:{}",
                self.config.webhook.listen_address, self.config.webhook.port
            )
            .parse()
            .context("准入校验监听地址无效")?;

            let mut rx = self.shutdown.subscribe();
            let shutdown = async move {
                let _ = rx.changed().await;
            };
            let (_, serve) = match self.config.webhook.tls_paths()? {
                Some((cert, key)) => {
                    let tls_config = webhook::load_tls_config(cert, key)?;
                    webhook::WebhookServer::bind_tls(addr, tls_config, shutdown)?
                }
                None => {
                    warn!("未配置 webhook 证书，以明文 HTTP 提供准入校验");
                    webhook::WebhookServer::bind(addr, shutdown)?
                }
            };
            tasks.push(tokio::spawn(async move {
                if let Err(e) = serve.await {
                    error!("准入校验服务异常退出: {:#}", e);
                }
            }));
        }

        let controller = controller::Controller::new(self.client.clone(), reconciler);
        tasks.push(tokio::spawn(controller.run(self.shutdown.subscribe())));

        info!("CAPK Operator 已启动");
        Ok(())
    }

    /// 停止 Operator，等待后台任务结束
    pub async fn stop(&self) -> Result<()> {
        let _ = self.shutdown.send(true);

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            task.await.context("后台任务异常退出")?;
        }

        info!("CAPK Operator 已停止");
        Ok(())
    }
}

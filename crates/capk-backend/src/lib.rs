//! CAPK Backend - 持有 kind 集群的后端进程
//!
//! 该模块实现了运行在 kind 所在主机上的后端服务：通过 kind 命令行
//! 创建、检查、删除集群，并以 HTTP 接口暴露给 Operator。

pub mod config;
pub mod kind;
pub mod server;

use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use capk_common::ClusterBackend;

/// 后端服务主结构体
pub struct Backend {
    /// 配置
    config: config::BackendConfig,
    /// HTTP 服务
    server: server::BackendServer,
}

impl Backend {
    /// 使用 kind 命令行后端创建服务
    pub fn new(config: config::BackendConfig) -> Self {
        let cluster_backend: Arc<dyn ClusterBackend> = Arc::new(kind::KindCli::new(&config.kind));
        Self::with_cluster_backend(config, cluster_backend)
    }

    /// 使用指定的集群后端创建服务
    pub fn with_cluster_backend(
        config: config::BackendConfig,
        cluster_backend: Arc<dyn ClusterBackend>,
    ) -> Self {
        Self {
            config,
            server: server::BackendServer::new(cluster_backend),
        }
    }

    /// 运行服务，直到 `shutdown` 完成
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = format!("{}:{}", self.config.listen_address, self.config.port)
            .parse()
            .context("监听地址无效")?;

        let (_, serve) = self.server.bind(addr, shutdown)?;
        serve.await
    }
}

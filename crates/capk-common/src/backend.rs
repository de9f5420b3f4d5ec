//! 集群后端接口
//!
//! 协调器通过该接口驱动真正持有 kind 集群的外部系统。每个调用都可能阻塞
//! 数十秒，调用方必须等待完成后再进入下一步。

use async_trait::async_trait;
use thiserror::Error;

use crate::models::kind_cluster::KindCluster;
use crate::models::kind_config::KindConfig;

/// 远程后端响应头：标记 404 是因为集群不存在，而不是路由或地址错误
pub const CLUSTER_NOT_FOUND_HEADER: &str = "x-capk-cluster-not-found";

/// 集群后端错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// 后端集群不存在
    #[error("集群 {0} 不存在")]
    NotFound(String),

    /// 请求无法送达或响应无法解析
    #[error("请求失败: {0}")]
    Request(String),

    /// 后端返回非 2xx 状态码
    #[error("后端返回异常状态码 {0}")]
    Status(u16),

    /// kind 命令执行失败
    #[error("命令执行失败: {0}")]
    Command(String),
}

/// 集群后端结果类型别名
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// 集群后端
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    /// 创建集群，名称为 `cluster.backend_name()`
    ///
    /// `cluster` 是完整资源文档，远程后端会原样转发；本地后端只使用 `config`。
    async fn create(&self, cluster: &KindCluster, config: &KindConfig) -> BackendResult<()>;

    /// 集群是否就绪，无副作用
    async fn is_ready(&self, name: &str) -> BackendResult<bool>;

    /// 获取 kubeconfig 文档
    async fn kubeconfig(&self, name: &str) -> BackendResult<String>;

    /// 删除集群，集群不存在时返回 [`BackendError::NotFound`]
    async fn delete(&self, name: &str) -> BackendResult<()>;
}

//! 错误处理模块
//!
//! 该模块提供 CAPK 的统一错误类型。协调过程中的后端失败会携带
//! 机器可读的 [`FailureReason`]，便于写回资源状态。

use std::io;
use thiserror::Error;

use crate::backend::BackendError;
use crate::models::kind_cluster::FailureReason;

/// CAPK 统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 集群后端调用失败
    #[error("集群后端错误: {0}")]
    Backend(#[from] BackendError),

    /// kubeconfig 中没有匹配且可解析的集群地址
    #[error("无法找到 {0} 的有效服务器地址")]
    EndpointNotFound(String),

    /// 准入校验拒绝了对不可变字段的修改
    #[error("spec-immutable: 不允许修改 {0}")]
    SpecImmutable(&'static str),

    /// 协调步骤失败，原因已写入资源状态
    #[error("{reason}: {message}")]
    Reconcile {
        reason: FailureReason,
        message: String,
    },

    /// Kubernetes API 错误
    #[error("Kubernetes API 错误: {0}")]
    Kube(#[from] kube::Error),

    /// 资源存储错误
    #[error("资源存储错误: {0}")]
    Store(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] io::Error),

    /// JSON 错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// 返回错误对应的失败原因（仅协调失败时存在）
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Error::Reconcile { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// CAPK 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;

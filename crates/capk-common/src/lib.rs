//! CAPK Common - 跨模块共享的资源模型、后端接口与错误处理
//!
//! 该模块提供 Operator 与集群后端进程共享的数据结构：KindCluster 自定义资源、
//! kind 节点池配置、控制平面地址解析，以及统一的错误类型与集群后端接口。

pub mod backend;
pub mod error;
pub mod models;

/// 重新导出常用类型，方便使用
pub use backend::{BackendError, BackendResult, ClusterBackend, CLUSTER_NOT_FOUND_HEADER};
pub use error::Error;
pub use error::Result;
pub use models::endpoint::*;
pub use models::kind_cluster::*;
pub use models::kind_config::*;

//! 数据模型模块
//!
//! 该模块定义了 KindCluster 自定义资源、传递给 kind 的节点池配置，
//! 以及从 kubeconfig 中解析出的控制平面地址。

pub mod endpoint;
pub mod kind_cluster;
pub mod kind_config;

//! KindCluster 自定义资源定义
//!
//! KindCluster 是 Cluster API 的基础设施资源，描述一个由 kind 创建的本地集群。
//! spec 在首次创建后不可修改（由准入校验保证），status 只由协调器写入。

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 协调器在资源上放置的 finalizer 标记
pub const FINALIZER_NAME: &str = "kindcluster.cluster.x-k8s.io/finalizer";

/// 默认节点镜像
pub const DEFAULT_IMAGE: &str = "kindest/node";

/// 默认 Kubernetes 版本
pub const DEFAULT_VERSION: &str = "v1.21.2";

/// 默认控制平面节点数
pub const DEFAULT_REPLICAS: i32 = 1;

/// KindCluster 期望状态
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1alpha4",
    kind = "KindCluster",
    plural = "kindclusters",
    namespaced,
    status = "KindClusterStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Endpoint", "type":"string", "jsonPath":".spec.controlPlaneEndpoint.host"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KindClusterSpec {
    /// 节点镜像名称（不含 tag）
    #[serde(default = "default_image")]
    pub image: String,

    /// Kubernetes 版本，例如 v1.21.2
    #[serde(default = "default_version")]
    #[schemars(regex(pattern = r"^v\d\.\d+\.\d+$"))]
    pub version: String,

    /// 控制平面节点数
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// 启用或禁用 Kubernetes feature gates
    #[serde(default)]
    pub feature_gates: BTreeMap<String, bool>,

    /// 启用或禁用内置 API（kube-apiserver --runtime-config）
    #[serde(default)]
    pub runtime_config: BTreeMap<String, String>,

    /// 控制平面访问地址，由控制器发现后写入
    #[serde(default)]
    pub control_plane_endpoint: ApiEndpoint,
}

impl Default for KindClusterSpec {
    fn default() -> Self {
        Self {
            image: default_image(),
            version: default_version(),
            replicas: default_replicas(),
            feature_gates: BTreeMap::new(),
            runtime_config: BTreeMap::new(),
            control_plane_endpoint: ApiEndpoint::default(),
        }
    }
}

/// Cluster API 的控制平面地址
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ApiEndpoint {
    /// 主机名或 IP
    #[serde(default)]
    pub host: String,

    /// 端口
    #[serde(default)]
    pub port: i32,
}

impl ApiEndpoint {
    /// 是否尚未设置
    pub fn is_empty(&self) -> bool {
        self.host.is_empty() && self.port == 0
    }
}

/// 集群生命周期阶段
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum KindClusterPhase {
    /// 初始阶段，尚未协调；旧版本写入的空字符串同样视为 Pending
    #[default]
    #[serde(alias = "")]
    Pending,
    /// 正在创建，或集群暂时未就绪
    Creating,
    /// 集群已创建并就绪
    Ready,
    /// 正在删除
    Deleting,
}

impl fmt::Display for KindClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            KindClusterPhase::Pending => "Pending",
            KindClusterPhase::Creating => "Creating",
            KindClusterPhase::Ready => "Ready",
            KindClusterPhase::Deleting => "Deleting",
        };
        f.write_str(phase)
    }
}

/// 机器可读的失败原因
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum FailureReason {
    /// 创建集群失败
    CreateFailed,
    /// 获取 kubeconfig 失败
    KubeConfigNotFound,
    /// 无法解析控制平面地址
    ControlPlaneEndpointInvalid,
    /// 就绪检查失败
    ClusterNotFound,
    /// 删除集群失败
    DeleteFailed,
}

impl FailureReason {
    /// 返回写入 status 的原因代码
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::CreateFailed => "CreateFailed",
            FailureReason::KubeConfigNotFound => "KubeConfigNotFound",
            FailureReason::ControlPlaneEndpointInvalid => "ControlPlaneEndpointInvalid",
            FailureReason::ClusterNotFound => "ClusterNotFound",
            FailureReason::DeleteFailed => "DeleteFailed",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// KindCluster 观测状态
///
/// 可选字段不会被省略：合并补丁中的 `null` 用于清除已恢复的失败信息。
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KindClusterStatus {
    /// 集群是否可用
    #[serde(default)]
    pub ready: bool,

    /// 当前生命周期阶段
    #[serde(default)]
    pub phase: KindClusterPhase,

    /// 访问集群使用的 kubeconfig
    #[serde(default)]
    pub kube_config: Option<String>,

    /// 失败原因代码
    #[serde(default)]
    pub failure_reason: Option<FailureReason>,

    /// 失败详情
    #[serde(default)]
    pub failure_message: Option<String>,
}

impl KindClusterStatus {
    /// 记录失败原因
    pub fn set_failure(&mut self, reason: FailureReason, message: impl Into<String>) {
        self.failure_reason = Some(reason);
        self.failure_message = Some(message.into());
    }

    /// 清除失败原因
    pub fn clear_failure(&mut self) {
        self.failure_reason = None;
        self.failure_message = None;
    }
}

impl KindCluster {
    /// 后端集群名称：`<namespace>-<name>`
    pub fn backend_name(&self) -> String {
        let namespace = self.namespace().unwrap_or_else(|| "default".into());
        format!("{}-{}", namespace, self.name_any())
    }

    /// 当前阶段，status 缺失时为 Pending
    pub fn phase(&self) -> KindClusterPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// 可写的 status，缺失时初始化为默认值
    pub fn status_mut(&mut self) -> &mut KindClusterStatus {
        self.status.get_or_insert_with(KindClusterStatus::default)
    }

    /// 是否已带有本控制器的 finalizer
    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == FINALIZER_NAME)
    }

    /// 添加 finalizer（已存在时不重复添加）
    pub fn add_finalizer(&mut self) {
        if !self.has_finalizer() {
            self.finalizers_mut().push(FINALIZER_NAME.to_string());
        }
    }

    /// 移除 finalizer
    pub fn remove_finalizer(&mut self) {
        self.finalizers_mut().retain(|f| f != FINALIZER_NAME);
    }

    /// 是否已收到删除请求
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

fn default_replicas() -> i32 {
    DEFAULT_REPLICAS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(namespace: &str, name: &str) -> KindCluster {
        let mut cluster = KindCluster::new(name, KindClusterSpec::default());
        cluster.metadata.namespace = Some(namespace.to_string());
        cluster
    }

    #[test]
    fn test_backend_name() {
        assert_eq!(cluster("dev", "alpha").backend_name(), "dev-alpha");

        let mut no_namespace = cluster("dev", "alpha");
        no_namespace.metadata.namespace = None;
        assert_eq!(no_namespace.backend_name(), "default-alpha");
    }

    #[test]
    fn test_spec_defaults_from_empty_document() {
        let spec: KindClusterSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.image, "kindest/node");
        assert_eq!(spec.version, "v1.21.2");
        assert_eq!(spec.replicas, 1);
        assert!(spec.feature_gates.is_empty());
        assert!(spec.control_plane_endpoint.is_empty());
    }

    #[test]
    fn test_empty_phase_is_pending() {
        let status: KindClusterStatus =
            serde_json::from_str(r#"{"ready": false, "phase": ""}"#).unwrap();
        assert_eq!(status.phase, KindClusterPhase::Pending);

        let status: KindClusterStatus = serde_json::from_str(r#"{"phase": "Ready"}"#).unwrap();
        assert_eq!(status.phase, KindClusterPhase::Ready);
    }

    #[test]
    fn test_status_serializes_cleared_failure_as_null() {
        let mut status = KindClusterStatus::default();
        status.set_failure(FailureReason::ClusterNotFound, "gone");
        status.clear_failure();

        let value = serde_json::to_value(&status).unwrap();
        assert!(value["failureReason"].is_null());
        assert!(value["failureMessage"].is_null());
        assert_eq!(value["phase"], "Pending");
    }

    #[test]
    fn test_failure_reason_codes() {
        let value = serde_json::to_value(FailureReason::ControlPlaneEndpointInvalid).unwrap();
        assert_eq!(value, "ControlPlaneEndpointInvalid");
        assert_eq!(FailureReason::KubeConfigNotFound.to_string(), "KubeConfigNotFound");
    }

    #[test]
    fn test_finalizer_helpers() {
        let mut cluster = cluster("dev", "alpha");
        assert!(!cluster.has_finalizer());

        cluster.add_finalizer();
        cluster.add_finalizer();
        assert!(cluster.has_finalizer());
        assert_eq!(cluster.finalizers().len(), 1);

        cluster.remove_finalizer();
        assert!(!cluster.has_finalizer());
    }

    #[test]
    fn test_phase_defaults_to_pending() {
        let mut cluster = cluster("dev", "alpha");
        assert_eq!(cluster.phase(), KindClusterPhase::Pending);

        cluster.status_mut().phase = KindClusterPhase::Creating;
        assert_eq!(cluster.phase(), KindClusterPhase::Creating);
    }
}

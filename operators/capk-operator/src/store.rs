//! 资源存储模块
//!
//! 协调器通过 [`ClusterStore`] 读取与写回 KindCluster，并查询所属的
//! Cluster API Cluster。生产环境使用 [`KubeStore`]，测试中可替换为内存实现。

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{
    api::{Api, ApiResource, DynamicObject, Patch, PatchParams},
    client::Client,
    core::GroupVersionKind,
    ResourceExt,
};
use serde_json::{json, Value};
use tracing::{debug, info};

use capk_common::{Error, KindCluster, Result, FINALIZER_NAME};

/// Cluster API 的暂停注解
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

/// Cluster API 核心资源组
const CLUSTER_API_GROUP: &str = "cluster.x-k8s.io";

/// 所属的 Cluster API Cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerCluster {
    /// Cluster 名称
    pub name: String,
    /// Cluster 是否被暂停
    pub paused: bool,
}

/// KindCluster 存储
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// 读取资源，不存在时返回 None
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<KindCluster>>;

    /// 查询所属 Cluster，尚未设置 OwnerRef 或 Cluster 已不存在时返回 None
    async fn owner(&self, cluster: &KindCluster) -> Result<Option<OwnerCluster>>;

    /// 写回 finalizer、`spec.controlPlaneEndpoint` 与 status，返回写入后的资源
    async fn persist(&self, cluster: &KindCluster) -> Result<KindCluster>;
}

/// 查找指向 Cluster API Cluster 的 OwnerRef
pub fn owner_cluster_ref(cluster: &KindCluster) -> Option<&OwnerReference> {
    cluster.owner_references().iter().find(|owner| {
        owner.kind == "Cluster"
            && owner
                .api_version
                .split_once('/')
                .map(|(group, _)| group == CLUSTER_API_GROUP)
                .unwrap_or(false)
    })
}

/// 资源是否带有暂停注解
pub fn has_paused_annotation(meta: &ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .map(|annotations| annotations.contains_key(PAUSED_ANNOTATION))
        .unwrap_or(false)
}

/// KindCluster 或其所属 Cluster 是否被暂停
pub fn is_paused(owner: &OwnerCluster, cluster: &KindCluster) -> bool {
    owner.paused || has_paused_annotation(&cluster.metadata)
}

/// 基于 Kubernetes API 的存储
pub struct KubeStore {
    /// Kubernetes 客户端
    client: Client,
}

impl KubeStore {
    /// 创建新的存储
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<KindCluster> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<KindCluster>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn owner(&self, cluster: &KindCluster) -> Result<Option<OwnerCluster>> {
        let Some(owner_ref) = owner_cluster_ref(cluster) else {
            return Ok(None);
        };

        let (group, version) = owner_ref
            .api_version
            .split_once('/')
            .ok_or_else(|| Error::Store(format!("无效的 apiVersion: {}", owner_ref.api_version)))?;
        let resource = ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, "Cluster"));
        let namespace = cluster.namespace().unwrap_or_else(|| "default".into());
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &namespace, &resource);

        let Some(owner) = api.get_opt(&owner_ref.name).await? else {
            info!("所属 Cluster {}/{} 不存在", namespace, owner_ref.name);
            return Ok(None);
        };

        let paused = owner
            .data
            .pointer("/spec/paused")
            .and_then(Value::as_bool)
            .unwrap_or(false)
            || has_paused_annotation(&owner.metadata);

        Ok(Some(OwnerCluster {
            name: owner.name_any(),
            paused,
        }))
    }

    async fn persist(&self, cluster: &KindCluster) -> Result<KindCluster> {
        let name = cluster.name_any();
        let namespace = cluster.namespace().unwrap_or_else(|| "default".into());
        let api = self.api(&namespace);
        let params = PatchParams::default();

        // 先写 status：移除最后一个 finalizer 后资源可能立即被删除
        let latest = match &cluster.status {
            Some(status) => {
                let patch = json!({ "status": status });
                api.patch_status(&name, &params, &Patch::Merge(&patch))
                    .await?
            }
            None => api.get(&name).await?,
        };

        let patch = metadata_patch(cluster, &latest);
        let stored = api.patch(&name, &params, &Patch::Merge(&patch)).await?;

        debug!("已写回 KindCluster {}/{}", namespace, name);
        Ok(stored)
    }
}

/// 生成 finalizer 与 `spec.controlPlaneEndpoint` 的合并补丁
///
/// finalizer 列表以 `latest` 为基础，只增删本控制器的标记，其他控制器的
/// finalizer 原样保留。补丁带上 `latest` 的 resourceVersion，期间资源若被
/// 修改，API server 返回 409，本次协调失败后重新入队。
pub fn metadata_patch(desired: &KindCluster, latest: &KindCluster) -> Value {
    let mut finalizers = latest.finalizers().to_vec();
    match (desired.has_finalizer(), latest.has_finalizer()) {
        (true, false) => finalizers.push(FINALIZER_NAME.to_string()),
        (false, true) => finalizers.retain(|f| f != FINALIZER_NAME),
        _ => {}
    }

    json!({
        "metadata": {
            "resourceVersion": latest.resource_version(),
            "finalizers": finalizers,
        },
        "spec": { "controlPlaneEndpoint": desired.spec.control_plane_endpoint },
    })
}

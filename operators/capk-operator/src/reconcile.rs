//! 资源协调模块
//!
//! 该模块实现 KindCluster 的生命周期状态机：
//!
//! ```text
//! Pending ──► Creating ──► Ready
//!    │           │  ▲        │
//!    │           │  └────────┘  (集群暂时未就绪)
//!    └───────────┴──────┴──► Deleting ──► (资源被移除)
//! ```
//!
//! 每次协调都可以安全重入：finalizer 先于任何后端调用写入，创建只在
//! Pending 阶段执行一次，删除在后端确认之前不会移除 finalizer。

use kube::{runtime::controller::Action, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use capk_common::{
    extract_endpoint, BackendError, ClusterBackend, Error, FailureReason, KindCluster,
    KindClusterPhase, KindConfig, Result,
};

use crate::store::{is_paused, ClusterStore};

/// 协调间隔设置
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// 成功后重新检查的间隔
    pub requeue_interval: Duration,
    /// 失败后重试的间隔
    pub error_requeue_interval: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            requeue_interval: Duration::from_secs(300),
            error_requeue_interval: Duration::from_secs(60),
        }
    }
}

/// 协调器结构体
pub struct Reconciler {
    /// 资源存储
    store: Arc<dyn ClusterStore>,
    /// 集群后端
    backend: Arc<dyn ClusterBackend>,
    /// 协调间隔
    settings: ReconcileSettings,
}

impl Reconciler {
    /// 创建新的协调器
    pub fn new(
        store: Arc<dyn ClusterStore>,
        backend: Arc<dyn ClusterBackend>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            store,
            backend,
            settings,
        }
    }

    /// 协调 KindCluster 资源
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action> {
        let Some(mut cluster) = self.store.get(namespace, name).await? else {
            debug!("KindCluster {}/{} 已不存在", namespace, name);
            return Ok(Action::await_change());
        };

        let Some(owner) = self.store.owner(&cluster).await? else {
            info!("KindCluster {}/{} 尚未被 Cluster 控制器设置 OwnerRef", namespace, name);
            return Ok(Action::await_change());
        };

        if is_paused(&owner, &cluster) {
            info!("KindCluster {}/{} 或所属 Cluster {} 已暂停，跳过协调", namespace, name, owner.name);
            return Ok(Action::await_change());
        }

        if cluster.is_deleting() {
            return self.reconcile_delete(cluster).await;
        }

        if !cluster.has_finalizer() {
            cluster.add_finalizer();
            cluster = self.store.persist(&cluster).await?;
            debug!("已为 KindCluster {}/{} 添加 finalizer", namespace, name);
        }

        self.reconcile_normal(cluster).await
    }

    /// 创建集群并刷新状态
    async fn reconcile_normal(&self, mut cluster: KindCluster) -> Result<Action> {
        let backend_name = cluster.backend_name();

        if cluster.phase() == KindClusterPhase::Pending {
            cluster.status_mut().phase = KindClusterPhase::Creating;
            cluster = self.store.persist(&cluster).await?;

            info!("创建 kind 集群 {}", backend_name);
            let config = KindConfig::from_spec(&cluster.spec);
            if let Err(e) = self.backend.create(&cluster, &config).await {
                return Err(self
                    .record_failure(cluster, FailureReason::CreateFailed, e)
                    .await);
            }

            let status = cluster.status_mut();
            status.ready = true;
            status.phase = KindClusterPhase::Ready;
            status.clear_failure();
            cluster = self.store.persist(&cluster).await?;
            info!("kind 集群 {} 已创建", backend_name);
        }

        // 刷新就绪状态
        let ready = match self.backend.is_ready(&backend_name).await {
            Ok(ready) => ready,
            Err(e) => {
                return Err(self
                    .record_failure(cluster, FailureReason::ClusterNotFound, e)
                    .await)
            }
        };
        let status = cluster.status_mut();
        status.ready = ready;
        status.phase = if ready {
            KindClusterPhase::Ready
        } else {
            KindClusterPhase::Creating
        };
        status.clear_failure();

        // 刷新 kubeconfig
        let kubeconfig = match self.backend.kubeconfig(&backend_name).await {
            Ok(kubeconfig) => kubeconfig,
            Err(e) => {
                return Err(self
                    .record_failure(cluster, FailureReason::KubeConfigNotFound, e)
                    .await)
            }
        };
        let endpoint = extract_endpoint(&kubeconfig, &backend_name);
        cluster.status_mut().kube_config = Some(kubeconfig);

        // 写入控制平面地址
        match endpoint {
            Ok(endpoint) => {
                cluster.spec.control_plane_endpoint = endpoint.into();
                cluster.status_mut().clear_failure();
            }
            Err(e) => {
                return Err(self
                    .record_failure(cluster, FailureReason::ControlPlaneEndpointInvalid, e)
                    .await)
            }
        }

        self.store.persist(&cluster).await?;
        debug!("KindCluster {} 协调完成，就绪: {}", backend_name, ready);

        Ok(Action::requeue(self.settings.requeue_interval))
    }

    /// 删除后端集群并移除 finalizer
    async fn reconcile_delete(&self, mut cluster: KindCluster) -> Result<Action> {
        if !cluster.has_finalizer() {
            return Ok(Action::await_change());
        }

        let backend_name = cluster.backend_name();
        info!("删除 kind 集群 {}", backend_name);

        let status = cluster.status_mut();
        status.phase = KindClusterPhase::Deleting;
        status.ready = false;
        cluster = self.store.persist(&cluster).await?;

        match self.backend.delete(&backend_name).await {
            Ok(()) => {}
            Err(BackendError::NotFound(_)) => {
                info!("kind 集群 {} 已不存在", backend_name);
            }
            Err(e) => {
                return Err(self
                    .record_failure(cluster, FailureReason::DeleteFailed, e)
                    .await)
            }
        }

        cluster.status_mut().clear_failure();
        cluster.remove_finalizer();
        self.store.persist(&cluster).await?;
        info!("已移除 KindCluster {} 的 finalizer", backend_name);

        Ok(Action::await_change())
    }

    /// 记录失败原因并写回，返回本次协调的错误
    async fn record_failure(
        &self,
        mut cluster: KindCluster,
        reason: FailureReason,
        cause: impl std::fmt::Display,
    ) -> Error {
        let message = cause.to_string();
        error!("KindCluster {} 协调失败 ({}): {}", cluster.backend_name(), reason, message);

        cluster.status_mut().set_failure(reason, message.clone());
        if let Err(e) = self.store.persist(&cluster).await {
            warn!("写回失败原因时出错: {}", e);
        }

        Error::Reconcile { reason, message }
    }

    /// 处理错误
    pub fn handle_error(&self, cluster: Arc<KindCluster>, error: &Error) -> Action {
        let name = cluster.name_any();
        let namespace = cluster.namespace().unwrap_or_else(|| "default".into());

        error!("协调 KindCluster {}/{} 失败: {}", namespace, name, error);

        Action::requeue(self.settings.error_requeue_interval)
    }
}

//! 控制器模块
//!
//! 该模块把协调器接入 kube-runtime 的控制器：监听所有命名空间的 KindCluster，
//! 同一对象同一时刻只有一次协调在执行，失败按错误策略重新入队。

use futures::StreamExt;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller as KubeController},
        watcher,
    },
    ResourceExt,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use capk_common::{Error, KindCluster, Result};

use crate::reconcile::Reconciler;

/// 控制器结构体
pub struct Controller {
    /// Kubernetes 客户端
    client: Client,
    /// 协调器
    reconciler: Arc<Reconciler>,
}

impl Controller {
    /// 创建新的控制器
    pub fn new(client: Client, reconciler: Arc<Reconciler>) -> Self {
        Self { client, reconciler }
    }

    /// 运行控制器，直到 `shutdown` 发出停止信号
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let clusters: Api<KindCluster> = Api::all(self.client.clone());

        let controller = KubeController::new(clusters, watcher::Config::default())
            .run(reconcile, error_policy, self.reconciler.clone())
            .for_each(|result| async move {
                match result {
                    Ok((obj, _)) => debug!("协调成功: {}", obj),
                    Err(e) => warn!("协调错误: {}", e),
                }
            });

        info!("启动 KindCluster 控制器");

        tokio::select! {
            _ = controller => info!("KindCluster 控制器已退出"),
            _ = shutdown.changed() => info!("KindCluster 控制器已停止"),
        }
    }
}

async fn reconcile(cluster: Arc<KindCluster>, reconciler: Arc<Reconciler>) -> Result<Action> {
    let namespace = cluster.namespace().unwrap_or_else(|| "default".into());
    reconciler.reconcile(&namespace, &cluster.name_any()).await
}

fn error_policy(cluster: Arc<KindCluster>, error: &Error, reconciler: Arc<Reconciler>) -> Action {
    reconciler.handle_error(cluster, error)
}

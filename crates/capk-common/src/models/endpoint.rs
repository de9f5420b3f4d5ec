//! 控制平面地址解析
//!
//! kind 返回的 kubeconfig 可能包含多个集群条目，这里按 `kind-<名称>` 找到
//! 对应条目并拆出 host/port。格式异常的条目会被跳过，继续查找同名的后续条目。

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::kind_cluster::ApiEndpoint;

/// 控制平面地址
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ClusterEndpoint {
    pub host: String,
    pub port: u16,
}

impl From<ClusterEndpoint> for ApiEndpoint {
    fn from(endpoint: ClusterEndpoint) -> Self {
        ApiEndpoint {
            host: endpoint.host,
            port: i32::from(endpoint.port),
        }
    }
}

/// 从 kubeconfig 中解析指定后端集群的控制平面地址
pub fn extract_endpoint(kubeconfig: &str, backend_name: &str) -> Result<ClusterEndpoint> {
    if kubeconfig.trim().is_empty() {
        return Err(Error::EndpointNotFound(backend_name.to_string()));
    }

    let document: Value = serde_yaml::from_str(kubeconfig)?;
    let expected = format!("kind-{}", backend_name);

    document
        .get("clusters")
        .and_then(Value::as_sequence)
        .into_iter()
        .flatten()
        .filter(|entry| entry.get("name").and_then(Value::as_str) == Some(expected.as_str()))
        .filter_map(|entry| entry.get("cluster")?.get("server")?.as_str())
        .find_map(parse_server)
        .ok_or_else(|| Error::EndpointNotFound(backend_name.to_string()))
}

/// 拆分 `scheme://host:port`，无法解析时返回 None
fn parse_server(server: &str) -> Option<ClusterEndpoint> {
    let address = server
        .strip_prefix("https://")
        .or_else(|| server.strip_prefix("http://"))
        .unwrap_or(server);

    let parsed = address.rsplit_once(':').and_then(|(host, port)| {
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(ClusterEndpoint {
            host: host.to_string(),
            port: port.parse().ok()?,
        })
    });

    if parsed.is_none() {
        debug!("跳过无法解析的服务器地址: {}", server);
    }
    parsed
}

//! kind 节点池配置
//!
//! 将 KindCluster 的期望状态转换为 kind v1alpha4 集群配置文档。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::models::kind_cluster::{
    KindClusterSpec, DEFAULT_IMAGE, DEFAULT_REPLICAS, DEFAULT_VERSION,
};

/// kind 节点角色
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    /// 控制平面节点
    ControlPlane,
    /// 工作节点
    Worker,
}

/// kind 节点描述
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct KindNode {
    pub role: NodeRole,
    pub image: String,
}

/// kind 集群配置（kind.x-k8s.io/v1alpha4）
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KindConfig {
    pub kind: String,
    pub api_version: String,
    pub nodes: Vec<KindNode>,
    #[serde(default)]
    pub feature_gates: BTreeMap<String, bool>,
    #[serde(default)]
    pub runtime_config: BTreeMap<String, String>,
}

impl KindConfig {
    /// 按默认值规则从期望状态生成配置
    pub fn from_spec(spec: &KindClusterSpec) -> Self {
        let replicas = if spec.replicas > 0 {
            spec.replicas
        } else {
            DEFAULT_REPLICAS
        };
        let image = if spec.image.is_empty() {
            DEFAULT_IMAGE
        } else {
            spec.image.as_str()
        };
        let version = if spec.version.is_empty() {
            DEFAULT_VERSION
        } else {
            spec.version.as_str()
        };

        let nodes = (0..replicas)
            .map(|_| KindNode {
                role: NodeRole::ControlPlane,
                image: format!("{}:{}", image, version),
            })
            .collect();

        Self {
            kind: "Cluster".to_string(),
            api_version: "kind.x-k8s.io/v1alpha4".to_string(),
            nodes,
            feature_gates: spec.feature_gates.clone(),
            runtime_config: spec.runtime_config.clone(),
        }
    }

    /// 渲染为 `kind create cluster --config` 接受的 YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied_to_empty_spec() {
        let spec = KindClusterSpec {
            replicas: 0,
            image: String::new(),
            version: String::new(),
            ..Default::default()
        };

        let config = KindConfig::from_spec(&spec);
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.nodes[0].image, "kindest/node:v1.21.2");
        assert_eq!(config.nodes[0].role, NodeRole::ControlPlane);
        assert!(config.feature_gates.is_empty());
        assert!(config.runtime_config.is_empty());
    }

    #[test]
    fn test_negative_replicas_treated_as_default() {
        let spec = KindClusterSpec {
            replicas: -3,
            ..Default::default()
        };
        assert_eq!(KindConfig::from_spec(&spec).nodes.len(), 1);
    }

    #[test]
    fn test_replicas_and_passthrough() {
        let mut spec = KindClusterSpec {
            image: "registry.local/node".to_string(),
            version: "v1.24.0".to_string(),
            replicas: 3,
            ..Default::default()
        };
        spec.feature_gates.insert("EphemeralContainers".to_string(), true);
        spec.runtime_config.insert("api/alpha".to_string(), "false".to_string());

        let config = KindConfig::from_spec(&spec);
        assert_eq!(config.nodes.len(), 3);
        assert!(config
            .nodes
            .iter()
            .all(|n| n.image == "registry.local/node:v1.24.0"));
        assert_eq!(config.feature_gates, spec.feature_gates);
        assert_eq!(config.runtime_config, spec.runtime_config);
    }

    #[test]
    fn test_yaml_rendering() {
        let yaml = KindConfig::from_spec(&KindClusterSpec::default())
            .to_yaml()
            .unwrap();
        assert!(yaml.contains("kind: Cluster"));
        assert!(yaml.contains("apiVersion: kind.x-k8s.io/v1alpha4"));
        assert!(yaml.contains("role: control-plane"));
        assert!(yaml.contains("image: kindest/node:v1.21.2"));
    }
}

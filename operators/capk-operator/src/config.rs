//! 配置管理模块
//!
//! Operator 配置按 默认值 < 配置文件 < `CAPK_` 环境变量 的顺序加载。
//! 后端地址额外读取 `KIND_SERVER_ENDPOINT` 与 `KIND_SERVER_PORT`，优先级最高。

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::reconcile::ReconcileSettings;

/// 后端主机环境变量
pub const BACKEND_HOST_ENV: &str = "KIND_SERVER_ENDPOINT";

/// 后端端口环境变量
pub const BACKEND_PORT_ENV: &str = "KIND_SERVER_PORT";

/// Operator 配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// 后端服务地址
    #[serde(default)]
    pub backend: BackendEndpointConfig,
    /// 准入校验服务
    #[serde(default)]
    pub webhook: WebhookConfig,
    /// 协调间隔
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// 后端服务地址
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendEndpointConfig {
    #[serde(default = "default_backend_host")]
    pub host: String,
    #[serde(default = "default_backend_port")]
    pub port: u16,
}

/// 准入校验服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// 是否启动准入校验服务
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_webhook_port")]
    pub port: u16,
    /// PEM 格式的服务端证书，与私钥同时配置时启用 HTTPS
    #[serde(default)]
    pub tls_cert_path: Option<PathBuf>,
    /// PEM 格式的私钥
    #[serde(default)]
    pub tls_key_path: Option<PathBuf>,
}

/// 协调间隔配置（秒）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_requeue_interval")]
    pub requeue_interval_seconds: u64,
    #[serde(default = "default_error_requeue_interval")]
    pub error_requeue_interval_seconds: u64,
}

impl Default for BackendEndpointConfig {
    fn default() -> Self {
        Self {
            host: default_backend_host(),
            port: default_backend_port(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_address: default_listen_address(),
            port: default_webhook_port(),
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

impl WebhookConfig {
    /// 证书与私钥路径，二者必须同时配置
    pub fn tls_paths(&self) -> Result<Option<(&Path, &Path)>> {
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert), Some(key)) => Ok(Some((cert.as_path(), key.as_path()))),
            (None, None) => Ok(None),
            _ => Err(anyhow!("tls_cert_path 与 tls_key_path 必须同时配置")),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            requeue_interval_seconds: default_requeue_interval(),
            error_requeue_interval_seconds: default_error_requeue_interval(),
        }
    }
}

impl ReconcileConfig {
    /// 转换为协调器设置
    pub fn settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            requeue_interval: Duration::from_secs(self.requeue_interval_seconds),
            error_requeue_interval: Duration::from_secs(self.error_requeue_interval_seconds),
        }
    }
}

impl OperatorConfig {
    /// 用 `KIND_SERVER_ENDPOINT` / `KIND_SERVER_PORT` 的值覆盖后端地址
    pub fn apply_backend_env(&mut self, host: Option<String>, port: Option<String>) -> Result<()> {
        if let Some(host) = host.filter(|h| !h.is_empty()) {
            self.backend.host = host;
        }
        if let Some(port) = port.filter(|p| !p.is_empty()) {
            self.backend.port = port
                .parse()
                .with_context(|| format!("{} 不是有效端口: {}", BACKEND_PORT_ENV, port))?;
        }
        Ok(())
    }
}

/// 加载配置
pub fn load_config(config_path: Option<&Path>) -> Result<OperatorConfig> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        let config_file = path.to_str().ok_or_else(|| anyhow!("配置路径无效"))?;

        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(anyhow!("不支持的配置文件格式，仅支持 YAML 或 JSON")),
        };

        builder = builder.add_source(File::with_name(config_file).format(format));
    }

    let mut config = builder
        .add_source(
            Environment::with_prefix("CAPK")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("构建配置失败")?
        .try_deserialize::<OperatorConfig>()
        .context("配置格式错误")?;

    config.apply_backend_env(
        std::env::var(BACKEND_HOST_ENV).ok(),
        std::env::var(BACKEND_PORT_ENV).ok(),
    )?;

    Ok(config)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_backend_host() -> String {
    "127.0.0.1".to_string()
}

fn default_backend_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_webhook_port() -> u16 {
    9443
}

fn default_requeue_interval() -> u64 {
    300
}

fn default_error_requeue_interval() -> u64 {
    60
}

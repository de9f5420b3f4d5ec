//! 配置管理模块
//!
//! 该模块负责加载后端进程的配置，支持 YAML/JSON 配置文件，
//! 并允许通过 `CAPK_` 前缀的环境变量覆盖（嵌套字段用 `__` 分隔）。

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 后端进程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// 监听地址
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// kind 命令配置
    #[serde(default)]
    pub kind: KindCliConfig,
}

/// kind 命令配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindCliConfig {
    /// kind 可执行文件
    #[serde(default = "default_binary")]
    pub binary: String,
    /// 创建集群时等待控制平面就绪的时间（秒）
    #[serde(default = "default_create_wait_seconds")]
    pub create_wait_seconds: u64,
    /// kind 写入的 kubeconfig 路径，默认为临时目录下的 kubeconfig
    #[serde(default)]
    pub kubeconfig_path: Option<PathBuf>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            port: default_port(),
            log_level: default_log_level(),
            kind: KindCliConfig::default(),
        }
    }
}

impl Default for KindCliConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            create_wait_seconds: default_create_wait_seconds(),
            kubeconfig_path: None,
        }
    }
}

impl KindCliConfig {
    /// kind 写入的 kubeconfig 路径
    pub fn kubeconfig_path(&self) -> PathBuf {
        self.kubeconfig_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("kubeconfig"))
    }
}

/// 加载配置：默认值 < 配置文件 < 环境变量
pub fn load_config(config_path: Option<&Path>) -> Result<BackendConfig> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        let config_file = path.to_str().ok_or_else(|| anyhow!("配置路径无效"))?;

        // 确定配置文件格式
        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(anyhow!("不支持的配置文件格式，仅支持 YAML 或 JSON")),
        };

        builder = builder.add_source(File::with_name(config_file).format(format));
    }

    let config = builder
        .add_source(
            Environment::with_prefix("CAPK")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("构建配置失败")?;

    config
        .try_deserialize::<BackendConfig>()
        .context("配置格式错误")
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_binary() -> String {
    "kind".to_string()
}

fn default_create_wait_seconds() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BackendConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.kind.binary, "kind");
        assert_eq!(config.kind.create_wait_seconds, 60);
        assert!(config.kind.kubeconfig_path().ends_with("kubeconfig"));
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "port: 3100\nkind:\n  binary: /usr/local/bin/kind\n  create_wait_seconds: 120"
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.port, 3100);
        assert_eq!(config.listen_address, "0.0.0.0");
        assert_eq!(config.kind.binary, "/usr/local/bin/kind");
        assert_eq!(config.kind.create_wait_seconds, 120);
    }

    #[test]
    fn test_rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        assert!(load_config(Some(file.path())).is_err());
    }
}

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    dispatch::{DispatchConfig, EventBusConfig, SchedulerConfig, WorkerHealthConfig},
    node_cluster::{BrokerNodeConfig, ClusterConfig},
    observability::ObservabilityConfig,
};

/// Broker配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerNodeConfig,
    pub cluster: ClusterConfig,
    pub scheduler: SchedulerConfig,
    pub dispatch: DispatchConfig,
    pub worker_health: WorkerHealthConfig,
    pub event_bus: EventBusConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序:
    /// 1. 结构体默认值
    /// 2. 配置文件(TOML)，未指定时依次尝试默认路径
    /// 3. 环境变量覆盖，例如 `BROKER__DISPATCH__TIMEOUT_MS=3000`
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = ["config/broker.toml", "broker.toml", "/etc/broker/config.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("BROKER")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.broker.validate().context("Broker节点配置验证失败")?;
        self.cluster.validate().context("集群配置验证失败")?;
        self.scheduler.validate().context("调度器配置验证失败")?;
        self.dispatch.validate().context("下发配置验证失败")?;
        self.worker_health
            .validate()
            .context("Worker健康检查配置验证失败")?;
        self.event_bus.validate().context("事件总线配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterMode, LockBackend};
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cluster.mode, ClusterMode::Standalone);
        assert!(!config.scheduler.allow_concurrent_instances);
        assert_eq!(config.broker.address(), "http://127.0.0.1:8500");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [cluster]
            mode = "cluster"
            lock_backend = "redis"
            redis_url = "redis://cache:6379"

            [dispatch]
            max_redispatch = 5
            default_load_balance = "consistent_hash"
            "#,
        )
        .unwrap();

        assert_eq!(config.cluster.mode, ClusterMode::Cluster);
        assert_eq!(config.cluster.lock_backend, LockBackend::Redis);
        assert_eq!(config.dispatch.max_redispatch, 5);
        assert_eq!(config.dispatch.timeout_ms, 5_000);
        assert_eq!(config.worker_health.liveness_window_seconds, 90);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let bad_strategy = AppConfig::from_toml(
            r#"
            [dispatch]
            default_load_balance = "fastest"
            "#,
        );
        assert!(bad_strategy.is_err());

        let mut config = AppConfig::default();
        config.dispatch.jitter_factor = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.event_bus.channel_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.observability.log_format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [broker]
            host = "10.0.0.5"
            port = 9000

            [worker_health]
            liveness_window_seconds = 15
            enable_sweep = true
            "#
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.broker.host, "10.0.0.5");
        assert_eq!(config.broker.port, 9000);
        assert_eq!(config.worker_health.liveness_window_seconds, 15);
        assert!(config.worker_health.enable_sweep);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = AppConfig::load(Some("/nonexistent/broker.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = AppConfig::default();
        config.cluster.peers = vec!["http://10.0.0.2:8500".to_string()];
        let text = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.cluster.peers, config.cluster.peers);
    }
}

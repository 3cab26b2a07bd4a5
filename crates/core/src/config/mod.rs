//! 配置管理
//!
//! 加载顺序: 结构体默认值 -> TOML配置文件 -> 环境变量(前缀 `BROKER`，层级分隔符 `__`)。

pub mod models;

pub use models::{
    AppConfig, BrokerNodeConfig, ClusterConfig, ClusterMode, DispatchConfig, EventBusConfig,
    LockBackend, ObservabilityConfig, SchedulerConfig, WorkerHealthConfig,
};

pub mod app_config;
pub mod dispatch;
pub mod node_cluster;
pub mod observability;

pub use app_config::AppConfig;
pub use dispatch::{DispatchConfig, EventBusConfig, SchedulerConfig, WorkerHealthConfig};
pub use node_cluster::{BrokerNodeConfig, ClusterConfig, ClusterMode, LockBackend};
pub use observability::ObservabilityConfig;

pub mod coordination;
pub mod event_bus;
pub mod lock;
pub mod observability;
pub mod repositories;
pub mod worker;
pub mod worker_client;

pub use coordination::{LockCoordinator, ScheduleCoordinator, StandaloneCoordinator};
pub use event_bus::{EventBus, EventSubscriber};
pub use lock::{
    acquire_with_backoff, InMemoryDistributedLock, InMemoryLockTable, RedisDistributedLock,
};
pub use observability::{MetricsCollector, MetricsSubscriber};
pub use repositories::{InMemoryInstanceRepository, InMemoryPlanRepository};
pub use worker::{LbStatisticsRepository, WorkerHealthTracker, WorkerRegistry};
pub use worker_client::HttpWorkerClient;

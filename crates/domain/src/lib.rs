pub mod cluster;
pub mod events;
pub mod models;
pub mod ports;
pub mod repositories;

pub use cluster::{BrokerNode, ClusterRequest, ClusterResponse};
pub use events::{Event, EventSource, EventTopic, SourceKind};
pub use models::*;
pub use ports::{DispatchOutcome, WorkerClient};
pub use repositories::{InstanceRepository, PlanRepository};

pub mod instance;
pub mod job;
pub mod job_graph;
pub mod plan;
pub mod statistics;
pub mod task;
pub mod worker;

pub use instance::{JobInstance, JobInstanceStatus, PlanInstance, PlanInstanceStatus};
pub use job::{
    DispatchOption, ExecuteType, ExecutorOption, Job, LoadBalanceType, TagCondition, TagFilter,
};
pub use job_graph::JobGraph;
pub use plan::{Plan, PlanDefinition, PlanVersion, ScheduleOption, ScheduleType, TriggerType};
pub use statistics::LbStatistics;
pub use task::{Task, TaskDispatchRequest, TaskReport, TaskReportStatus, TaskStatus};
pub use worker::{
    Worker, WorkerHeartbeat, WorkerMetric, WorkerRegistration, WorkerRegistrationResponse,
};

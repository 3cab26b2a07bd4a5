pub mod cluster_handler;
pub mod dispatch_pipeline;
pub mod fail_handler;
pub mod lifecycle;
pub mod plan_service;
pub mod plan_strategy;
pub mod retry;
pub mod runtime;
pub mod schedule_calculator;
pub mod scheduler;
pub mod selector;
pub mod strategies;
pub mod task_store;
pub mod worker_service;

pub use cluster_handler::ClusterHandler;
pub use dispatch_pipeline::{DispatchResult, TaskDispatchPipeline};
pub use fail_handler::{
    FailHandlerRegistry, FailureContext, FailureKind, IgnoreFailHandler, JobFailHandler,
    TerminateFailHandler, IGNORE_HANDLER, TERMINATE_HANDLER,
};
pub use lifecycle::LifecycleManager;
pub use plan_service::PlanService;
pub use plan_strategy::{PlanScheduleStrategy, PlanTrigger, ScheduleOutcome};
pub use retry::RetryConfig;
pub use runtime::{Broker, BrokerBuilder};
pub use schedule_calculator::{ScheduleCalculator, ScheduleContext};
pub use scheduler::{Schedulable, Scheduler};
pub use selector::WorkerSelector;
pub use strategies::{SelectionContext, WorkerSelectStrategy};
pub use task_store::TaskStore;
pub use worker_service::WorkerService;

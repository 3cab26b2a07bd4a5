//! 领域仓储抽象
//!
//! `save_*` 都是按ID覆盖写入。

use async_trait::async_trait;
use broker_core::BrokerResult;

use crate::models::{JobInstance, Plan, PlanInstance, PlanVersion, Task};

/// 计划仓储
#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn save_plan(&self, plan: &Plan) -> BrokerResult<()>;
    async fn find_plan(&self, id: &str) -> BrokerResult<Option<Plan>>;
    async fn list_plans(&self) -> BrokerResult<Vec<Plan>>;
    async fn save_version(&self, version: PlanVersion) -> BrokerResult<()>;
    async fn find_version(&self, plan_id: &str, version: u32)
        -> BrokerResult<Option<PlanVersion>>;
}

/// 运行实例仓储
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    async fn save_plan_instance(&self, instance: &PlanInstance) -> BrokerResult<()>;
    async fn find_plan_instance(&self, id: &str) -> BrokerResult<Option<PlanInstance>>;
    async fn list_plan_instances(&self, plan_id: &str) -> BrokerResult<Vec<PlanInstance>>;

    async fn save_job_instance(&self, instance: &JobInstance) -> BrokerResult<()>;
    async fn find_job_instance(&self, id: &str) -> BrokerResult<Option<JobInstance>>;
    async fn list_job_instances(&self, plan_instance_id: &str) -> BrokerResult<Vec<JobInstance>>;

    async fn save_task(&self, task: &Task) -> BrokerResult<()>;
    async fn find_task(&self, id: &str) -> BrokerResult<Option<Task>>;
    async fn list_tasks(&self, job_instance_id: &str) -> BrokerResult<Vec<Task>>;
}

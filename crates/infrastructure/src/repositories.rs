//! 内存仓储实现
//!
//! 每个实体一张 `DashMap`，按键分片加锁，互不相关的实体不会串行化。

use async_trait::async_trait;
use broker_core::BrokerResult;
use broker_domain::{
    InstanceRepository, JobInstance, Plan, PlanInstance, PlanRepository, PlanVersion, Task,
};
use dashmap::DashMap;

#[derive(Default)]
pub struct InMemoryPlanRepository {
    plans: DashMap<String, Plan>,
    versions: DashMap<(String, u32), PlanVersion>,
}

impl InMemoryPlanRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanRepository for InMemoryPlanRepository {
    async fn save_plan(&self, plan: &Plan) -> BrokerResult<()> {
        self.plans.insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    async fn find_plan(&self, id: &str) -> BrokerResult<Option<Plan>> {
        Ok(self.plans.get(id).map(|p| p.value().clone()))
    }

    async fn list_plans(&self) -> BrokerResult<Vec<Plan>> {
        let mut plans: Vec<Plan> = self.plans.iter().map(|p| p.value().clone()).collect();
        plans.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(plans)
    }

    async fn save_version(&self, version: PlanVersion) -> BrokerResult<()> {
        self.versions
            .insert((version.plan_id.clone(), version.version), version);
        Ok(())
    }

    async fn find_version(
        &self,
        plan_id: &str,
        version: u32,
    ) -> BrokerResult<Option<PlanVersion>> {
        Ok(self
            .versions
            .get(&(plan_id.to_string(), version))
            .map(|v| v.value().clone()))
    }
}

#[derive(Default)]
pub struct InMemoryInstanceRepository {
    plan_instances: DashMap<String, PlanInstance>,
    job_instances: DashMap<String, JobInstance>,
    tasks: DashMap<String, Task>,
}

impl InMemoryInstanceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceRepository for InMemoryInstanceRepository {
    async fn save_plan_instance(&self, instance: &PlanInstance) -> BrokerResult<()> {
        self.plan_instances
            .insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn find_plan_instance(&self, id: &str) -> BrokerResult<Option<PlanInstance>> {
        Ok(self.plan_instances.get(id).map(|i| i.value().clone()))
    }

    async fn list_plan_instances(&self, plan_id: &str) -> BrokerResult<Vec<PlanInstance>> {
        let mut instances: Vec<PlanInstance> = self
            .plan_instances
            .iter()
            .filter(|i| i.plan_id == plan_id)
            .map(|i| i.value().clone())
            .collect();
        instances.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(instances)
    }

    async fn save_job_instance(&self, instance: &JobInstance) -> BrokerResult<()> {
        self.job_instances
            .insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn find_job_instance(&self, id: &str) -> BrokerResult<Option<JobInstance>> {
        Ok(self.job_instances.get(id).map(|i| i.value().clone()))
    }

    async fn list_job_instances(&self, plan_instance_id: &str) -> BrokerResult<Vec<JobInstance>> {
        let mut instances: Vec<JobInstance> = self
            .job_instances
            .iter()
            .filter(|i| i.plan_instance_id == plan_instance_id)
            .map(|i| i.value().clone())
            .collect();
        instances.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.attempt.cmp(&b.attempt))
        });
        Ok(instances)
    }

    async fn save_task(&self, task: &Task) -> BrokerResult<()> {
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn find_task(&self, id: &str) -> BrokerResult<Option<Task>> {
        Ok(self.tasks.get(id).map(|t| t.value().clone()))
    }

    async fn list_tasks(&self, job_instance_id: &str) -> BrokerResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.job_instance_id == job_instance_id)
            .map(|t| t.value().clone())
            .collect();
        tasks.sort_by_key(|t| t.shard_index);
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_domain::{
        ExecuteType, ExecutorOption, Job, JobGraph, ScheduleOption, TriggerType,
    };
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_plan_versions_are_kept_separately() {
        let repo = InMemoryPlanRepository::new();
        let now = Utc::now();
        let plan = Plan {
            id: "p-1".to_string(),
            name: "etl".to_string(),
            description: String::new(),
            current_version: 2,
            trigger_type: TriggerType::Api,
            schedule_option: ScheduleOption::none(),
            allow_concurrent: false,
            enabled: true,
            created_at: now,
            updated_at: now,
        };
        repo.save_plan(&plan).await.unwrap();

        for (version, job_id) in [(1, "old"), (2, "new")] {
            let graph = JobGraph::new(vec![Job::new(
                job_id,
                ExecutorOption::new("echo", ExecuteType::Shell),
            )])
            .unwrap();
            repo.save_version(PlanVersion {
                plan_id: plan.id.clone(),
                version,
                graph: Arc::new(graph),
                created_at: now,
            })
            .await
            .unwrap();
        }

        let v1 = repo.find_version("p-1", 1).await.unwrap().unwrap();
        let v2 = repo.find_version("p-1", 2).await.unwrap().unwrap();
        assert!(v1.graph.job("old").is_some());
        assert!(v2.graph.job("new").is_some());
        assert!(repo.find_version("p-1", 3).await.unwrap().is_none());
        assert_eq!(repo.list_plans().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_instances_are_listed_by_parent() {
        let repo = InMemoryInstanceRepository::new();
        let now = Utc::now();
        let pi = PlanInstance::new("p-1", 1, TriggerType::Api, now, now);
        let other = PlanInstance::new("p-2", 1, TriggerType::Api, now, now);
        repo.save_plan_instance(&pi).await.unwrap();
        repo.save_plan_instance(&other).await.unwrap();

        let ji = JobInstance::new(&pi, "a", 0, HashMap::new(), now);
        repo.save_job_instance(&ji).await.unwrap();
        for shard in [1, 0] {
            repo.save_task(&Task::new(&ji, shard, 2, now)).await.unwrap();
        }

        assert_eq!(repo.list_plan_instances("p-1").await.unwrap().len(), 1);
        assert_eq!(repo.list_job_instances(&pi.id).await.unwrap().len(), 1);
        let tasks = repo.list_tasks(&ji.id).await.unwrap();
        assert_eq!(tasks.iter().map(|t| t.shard_index).collect::<Vec<_>>(), vec![0, 1]);
    }
}

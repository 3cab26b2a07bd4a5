use std::collections::HashMap;
use std::fmt;

use broker_core::{BrokerError, BrokerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::instance::JobInstance;
use super::job::ExecutorOption;

/// 任务状态
///
/// ```text
/// Created -> Dispatched -> Accepted -> Running -> Succeeded -> Closed
///                  \-> Refused -> Dispatched            \-> Failed -> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Dispatched,
    Accepted,
    Refused,
    Running,
    Succeeded,
    Failed,
    Closed,
}

impl TaskStatus {
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Created, Dispatched)
                | (Created, Failed)
                | (Dispatched, Accepted)
                | (Dispatched, Refused)
                | (Refused, Dispatched)
                | (Refused, Failed)
                | (Accepted, Running)
                | (Accepted, Failed)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Succeeded, Closed)
                | (Failed, Closed)
        )
    }

    /// 已得出执行结果
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Closed
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// 下发给Worker的最小执行单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub job_instance_id: String,
    pub plan_instance_id: String,
    pub job_id: String,
    pub shard_index: u32,
    pub shard_total: u32,
    pub worker_id: Option<String>,
    pub status: TaskStatus,
    pub redispatch_count: u32,
    pub attributes: HashMap<String, serde_json::Value>,
    pub result_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        job_instance: &JobInstance,
        shard_index: u32,
        shard_total: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let mut attributes = job_instance.attributes().clone();
        attributes.insert("shard_index".to_string(), shard_index.into());
        attributes.insert("shard_total".to_string(), shard_total.into());
        Self {
            id: Uuid::new_v4().to_string(),
            job_instance_id: job_instance.id.clone(),
            plan_instance_id: job_instance.plan_instance_id.clone(),
            job_id: job_instance.job_id.clone(),
            shard_index,
            shard_total,
            worker_id: None,
            status: TaskStatus::Created,
            redispatch_count: 0,
            attributes,
            result_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 状态变更；非法变更返回错误且不修改任务
    pub fn transition(&mut self, to: TaskStatus, now: DateTime<Utc>) -> BrokerResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(BrokerError::invalid_transition("task", &self.id, self.status, to));
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// 重新下发计数加一；达到上限时返回错误且计数不变
    pub fn bump_redispatch(&mut self, max: u32) -> BrokerResult<u32> {
        if self.redispatch_count >= max {
            return Err(BrokerError::RedispatchExhausted {
                id: self.id.clone(),
                max,
            });
        }
        self.redispatch_count += 1;
        Ok(self.redispatch_count)
    }

    /// 一致性哈希使用的键
    pub fn dispatch_key(&self) -> String {
        if self.shard_total <= 1 {
            self.job_id.clone()
        } else {
            format!("{}#{}", self.job_id, self.shard_index)
        }
    }
}

/// Broker -> Worker 的下发请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDispatchRequest {
    pub task_id: String,
    pub job_instance_id: String,
    pub plan_instance_id: String,
    pub job_id: String,
    pub executor: ExecutorOption,
    pub shard_index: u32,
    pub shard_total: u32,
    pub attributes: HashMap<String, serde_json::Value>,
}

impl TaskDispatchRequest {
    pub fn from_task(task: &Task, executor: ExecutorOption) -> Self {
        Self {
            task_id: task.id.clone(),
            job_instance_id: task.job_instance_id.clone(),
            plan_instance_id: task.plan_instance_id.clone(),
            job_id: task.job_id.clone(),
            executor,
            shard_index: task.shard_index,
            shard_total: task.shard_total,
            attributes: task.attributes.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskReportStatus {
    Running,
    Succeeded,
    Failed,
}

/// Worker上报的任务执行状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: String,
    pub worker_id: String,
    pub status: TaskReportStatus,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::instance::PlanInstance;
    use crate::models::plan::TriggerType;

    fn new_task() -> Task {
        let now = Utc::now();
        let plan_instance = PlanInstance::new("p", 1, TriggerType::Api, now, now);
        let job_instance = JobInstance::new(&plan_instance, "j", 0, HashMap::new(), now);
        Task::new(&job_instance, 0, 1, now)
    }

    #[test]
    fn test_happy_path_transitions() {
        let now = Utc::now();
        let mut task = new_task();
        for to in [
            TaskStatus::Dispatched,
            TaskStatus::Accepted,
            TaskStatus::Running,
            TaskStatus::Succeeded,
            TaskStatus::Closed,
        ] {
            task.transition(to, now).unwrap();
        }
        assert_eq!(task.status, TaskStatus::Closed);
    }

    #[test]
    fn test_closed_is_terminal() {
        let now = Utc::now();
        let mut task = new_task();
        task.transition(TaskStatus::Failed, now).unwrap();
        task.transition(TaskStatus::Closed, now).unwrap();
        let before = task.clone();

        for to in [
            TaskStatus::Created,
            TaskStatus::Dispatched,
            TaskStatus::Running,
            TaskStatus::Failed,
            TaskStatus::Closed,
        ] {
            let err = task.transition(to, now).unwrap_err();
            assert!(matches!(err, BrokerError::InvalidTransition { .. }));
        }
        assert_eq!(task, before);
    }

    #[test]
    fn test_backward_transitions_are_rejected() {
        let now = Utc::now();
        let mut task = new_task();
        task.transition(TaskStatus::Dispatched, now).unwrap();
        task.transition(TaskStatus::Accepted, now).unwrap();
        assert!(task.transition(TaskStatus::Dispatched, now).is_err());
        assert!(task.transition(TaskStatus::Succeeded, now).is_err());
        assert_eq!(task.status, TaskStatus::Accepted);
    }

    #[test]
    fn test_redispatch_counter_is_bounded() {
        let mut task = new_task();
        assert_eq!(task.bump_redispatch(2).unwrap(), 1);
        assert_eq!(task.bump_redispatch(2).unwrap(), 2);
        let err = task.bump_redispatch(2).unwrap_err();
        assert_eq!(err.code(), "REDISPATCH_EXHAUSTED");
        assert_eq!(task.redispatch_count, 2);
    }

    #[test]
    fn test_shard_attributes_and_key() {
        let now = Utc::now();
        let plan_instance = PlanInstance::new("p", 1, TriggerType::Api, now, now);
        let job_instance = JobInstance::new(&plan_instance, "j", 0, HashMap::new(), now);
        let task = Task::new(&job_instance, 2, 4, now);
        assert_eq!(task.attributes["shard_index"], 2);
        assert_eq!(task.attributes["shard_total"], 4);
        assert_eq!(task.dispatch_key(), "j#2");
        assert_eq!(new_task().dispatch_key(), "j");
    }
}

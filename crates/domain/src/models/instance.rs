use std::collections::HashMap;

use broker_core::{BrokerError, BrokerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::plan::TriggerType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanInstanceStatus {
    Running,
    Succeeded,
    Failed,
}

impl PlanInstanceStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, PlanInstanceStatus::Running)
    }
}

/// 计划的一次运行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanInstance {
    pub id: String,
    pub plan_id: String,
    pub version: u32,
    pub trigger_type: TriggerType,
    pub trigger_at: DateTime<Utc>,
    pub status: PlanInstanceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PlanInstance {
    pub fn new(
        plan_id: impl Into<String>,
        version: u32,
        trigger_type: TriggerType,
        trigger_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            plan_id: plan_id.into(),
            version,
            trigger_type,
            trigger_at,
            status: PlanInstanceStatus::Running,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn finish(&mut self, status: PlanInstanceStatus, now: DateTime<Utc>) -> BrokerResult<()> {
        if self.status.is_finished() || !status.is_finished() {
            return Err(BrokerError::invalid_transition(
                "plan_instance",
                &self.id,
                self.status,
                status,
            ));
        }
        self.status = status;
        self.updated_at = now;
        self.finished_at = Some(now);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobInstanceStatus {
    Running,
    Succeeded,
    Failed,
}

impl JobInstanceStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobInstanceStatus::Running)
    }
}

/// 作业的一次运行
///
/// `attributes` 在创建时确定，之后不再修改，用于向任务传递参数。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: String,
    pub plan_instance_id: String,
    pub plan_id: String,
    pub version: u32,
    pub job_id: String,
    /// 第几次尝试，从0开始
    pub attempt: u32,
    pub status: JobInstanceStatus,
    attributes: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobInstance {
    pub fn new(
        plan_instance: &PlanInstance,
        job_id: impl Into<String>,
        attempt: u32,
        attributes: HashMap<String, serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            plan_instance_id: plan_instance.id.clone(),
            plan_id: plan_instance.plan_id.clone(),
            version: plan_instance.version,
            job_id: job_id.into(),
            attempt,
            status: JobInstanceStatus::Running,
            attributes,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn attributes(&self) -> &HashMap<String, serde_json::Value> {
        &self.attributes
    }

    pub fn finish(&mut self, status: JobInstanceStatus, now: DateTime<Utc>) -> BrokerResult<()> {
        if self.status.is_finished() || !status.is_finished() {
            return Err(BrokerError::invalid_transition(
                "job_instance",
                &self.id,
                self.status,
                status,
            ));
        }
        self.status = status;
        self.updated_at = now;
        Ok(())
    }
}

//! 领域事件
//!
//! 单一的事件类型，订阅者按主题匹配。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTopic {
    PlanScheduled,
    PlanUnscheduled,
    PlanInstanceCreated,
    PlanInstanceSkipped,
    PlanInstanceSucceeded,
    PlanInstanceFailed,
    JobInstanceCreated,
    JobInstanceSucceeded,
    JobInstanceFailed,
    TaskCreated,
    TaskDispatched,
    TaskAccepted,
    TaskRefused,
    TaskUnreachable,
    TaskRunning,
    TaskSucceeded,
    TaskFailed,
    TaskClosed,
    WorkerRegistered,
    WorkerUnregistered,
    WorkerExpired,
}

impl EventTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventTopic::PlanScheduled => "plan_scheduled",
            EventTopic::PlanUnscheduled => "plan_unscheduled",
            EventTopic::PlanInstanceCreated => "plan_instance_created",
            EventTopic::PlanInstanceSkipped => "plan_instance_skipped",
            EventTopic::PlanInstanceSucceeded => "plan_instance_succeeded",
            EventTopic::PlanInstanceFailed => "plan_instance_failed",
            EventTopic::JobInstanceCreated => "job_instance_created",
            EventTopic::JobInstanceSucceeded => "job_instance_succeeded",
            EventTopic::JobInstanceFailed => "job_instance_failed",
            EventTopic::TaskCreated => "task_created",
            EventTopic::TaskDispatched => "task_dispatched",
            EventTopic::TaskAccepted => "task_accepted",
            EventTopic::TaskRefused => "task_refused",
            EventTopic::TaskUnreachable => "task_unreachable",
            EventTopic::TaskRunning => "task_running",
            EventTopic::TaskSucceeded => "task_succeeded",
            EventTopic::TaskFailed => "task_failed",
            EventTopic::TaskClosed => "task_closed",
            EventTopic::WorkerRegistered => "worker_registered",
            EventTopic::WorkerUnregistered => "worker_unregistered",
            EventTopic::WorkerExpired => "worker_expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Plan,
    PlanInstance,
    JobInstance,
    Task,
    Worker,
}

/// 事件来源
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventSource {
    pub kind: SourceKind,
    pub id: String,
}

impl EventSource {
    pub fn plan(id: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Plan,
            id: id.into(),
        }
    }

    pub fn plan_instance(id: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::PlanInstance,
            id: id.into(),
        }
    }

    pub fn job_instance(id: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::JobInstance,
            id: id.into(),
        }
    }

    pub fn task(id: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Task,
            id: id.into(),
        }
    }

    pub fn worker(id: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Worker,
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub topic: EventTopic,
    pub source: EventSource,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(topic: EventTopic, source: EventSource, occurred_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic,
            source,
            occurred_at,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

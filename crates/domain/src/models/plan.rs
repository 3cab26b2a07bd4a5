use std::sync::Arc;

use broker_core::{BrokerError, BrokerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::Job;
use super::job_graph::JobGraph;

/// 计划的触发方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// 只能通过API手动触发
    Api,
    /// 由调度器按调度配置触发
    Schedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    None,
    Once,
    FixedRate,
    FixedDelay,
    Cron,
}

/// 调度配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleOption {
    pub schedule_type: ScheduleType,
    /// 首次调度的起点，未设置时取计划创建时间
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    /// 首次调度前的延迟
    #[serde(default)]
    pub delay_ms: u64,
    /// FixedRate/FixedDelay 的间隔
    #[serde(default)]
    pub interval_ms: u64,
    #[serde(default)]
    pub cron: Option<String>,
}

impl ScheduleOption {
    pub fn none() -> Self {
        Self {
            schedule_type: ScheduleType::None,
            start_at: None,
            delay_ms: 0,
            interval_ms: 0,
            cron: None,
        }
    }

    pub fn once(start_at: Option<DateTime<Utc>>, delay_ms: u64) -> Self {
        Self {
            schedule_type: ScheduleType::Once,
            start_at,
            delay_ms,
            ..Self::none()
        }
    }

    pub fn fixed_rate(interval_ms: u64) -> Self {
        Self {
            schedule_type: ScheduleType::FixedRate,
            interval_ms,
            ..Self::none()
        }
    }

    pub fn fixed_delay(interval_ms: u64) -> Self {
        Self {
            schedule_type: ScheduleType::FixedDelay,
            interval_ms,
            ..Self::none()
        }
    }

    pub fn cron(expr: impl Into<String>) -> Self {
        Self {
            schedule_type: ScheduleType::Cron,
            cron: Some(expr.into()),
            ..Self::none()
        }
    }

    /// 结构校验；CRON表达式的语法由调度计算器校验
    pub fn validate(&self) -> BrokerResult<()> {
        match self.schedule_type {
            ScheduleType::FixedRate | ScheduleType::FixedDelay if self.interval_ms == 0 => Err(
                BrokerError::Validation("固定间隔调度的间隔必须大于0".to_string()),
            ),
            ScheduleType::Cron
                if self.cron.as_deref().map(str::trim).unwrap_or("").is_empty() =>
            {
                Err(BrokerError::Validation("CRON调度缺少表达式".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// 计划
///
/// 只能通过替换产生新版本来修改作业图，`current_version` 指向最新版本。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub description: String,
    pub current_version: u32,
    pub trigger_type: TriggerType,
    pub schedule_option: ScheduleOption,
    /// 上一个实例未结束时是否允许再次触发
    pub allow_concurrent: bool,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    /// 是否需要由调度器装配定时器
    pub fn is_schedulable(&self) -> bool {
        self.enabled
            && self.trigger_type == TriggerType::Schedule
            && self.schedule_option.schedule_type != ScheduleType::None
    }
}

/// 计划某一版本的不可变快照
#[derive(Debug, Clone)]
pub struct PlanVersion {
    pub plan_id: String,
    pub version: u32,
    pub graph: Arc<JobGraph>,
    pub created_at: DateTime<Utc>,
}

/// 外部传入的计划定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub trigger_type: TriggerType,
    #[serde(default = "ScheduleOption::none")]
    pub schedule_option: ScheduleOption,
    #[serde(default)]
    pub allow_concurrent: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub jobs: Vec<Job>,
}

fn default_enabled() -> bool {
    true
}

impl PlanDefinition {
    /// 校验定义并构建作业图
    pub fn validate(&self) -> BrokerResult<JobGraph> {
        if self.name.trim().is_empty() {
            return Err(BrokerError::Validation("计划名称不能为空".to_string()));
        }
        if self.trigger_type == TriggerType::Schedule
            && self.schedule_option.schedule_type == ScheduleType::None
        {
            return Err(BrokerError::Validation(
                "定时触发的计划必须指定调度类型".to_string(),
            ));
        }
        self.schedule_option.validate()?;
        JobGraph::new(self.jobs.clone())
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use broker_core::{BrokerError, BrokerResult, SharedClock};
use broker_domain::{
    Event, EventSource, EventTopic, InstanceRepository, Plan, PlanInstance, PlanInstanceStatus,
    PlanRepository, TriggerType,
};
use broker_infrastructure::EventBus;

use crate::lifecycle::LifecycleManager;
use crate::schedule_calculator::{ScheduleCalculator, ScheduleContext};
use crate::scheduler::Schedulable;

/// 一次触发的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    Created(PlanInstance),
    /// 上一个实例仍在运行且不允许并发
    SkippedOverlap { running_instance_id: String },
}

/// 计划触发策略：创建计划实例并启动根作业
pub struct PlanScheduleStrategy {
    plans: Arc<dyn PlanRepository>,
    instances: Arc<dyn InstanceRepository>,
    lifecycle: Arc<LifecycleManager>,
    event_bus: Arc<EventBus>,
    clock: SharedClock,
    allow_concurrent_instances: bool,
    guards: DashMap<String, Arc<Mutex<()>>>,
}

impl PlanScheduleStrategy {
    pub fn new(
        plans: Arc<dyn PlanRepository>,
        instances: Arc<dyn InstanceRepository>,
        lifecycle: Arc<LifecycleManager>,
        event_bus: Arc<EventBus>,
        clock: SharedClock,
        allow_concurrent_instances: bool,
    ) -> Self {
        Self {
            plans,
            instances,
            lifecycle,
            event_bus,
            clock,
            allow_concurrent_instances,
            guards: DashMap::new(),
        }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// 按计划当前版本创建计划实例
    pub async fn schedule(
        &self,
        trigger_type: TriggerType,
        plan: &Plan,
        trigger_at: DateTime<Utc>,
    ) -> BrokerResult<ScheduleOutcome> {
        let guard = self
            .guards
            .entry(plan.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _locked = guard.lock().await;

        let version = self
            .plans
            .find_version(&plan.id, plan.current_version)
            .await?
            .ok_or_else(|| BrokerError::PlanVersionNotFound {
                plan_id: plan.id.clone(),
                version: plan.current_version,
            })?;

        if !(plan.allow_concurrent || self.allow_concurrent_instances) {
            let running = self
                .instances
                .list_plan_instances(&plan.id)
                .await?
                .into_iter()
                .find(|i| i.status == PlanInstanceStatus::Running);
            if let Some(running) = running {
                info!(
                    "计划 {} 的实例 {} 仍在运行，跳过本次触发 ({})",
                    plan.id, running.id, trigger_at
                );
                self.publish(
                    EventTopic::PlanInstanceSkipped,
                    EventSource::plan(&plan.id),
                    json!({ "running_instance_id": running.id, "trigger_at": trigger_at }),
                )
                .await;
                return Ok(ScheduleOutcome::SkippedOverlap {
                    running_instance_id: running.id,
                });
            }
        }

        let now = self.clock.now();
        let plan_instance =
            PlanInstance::new(&plan.id, version.version, trigger_type, trigger_at, now);
        self.instances.save_plan_instance(&plan_instance).await?;
        info!(
            "计划 {} 创建实例 {} (版本: {}, 触发方式: {:?})",
            plan.id, plan_instance.id, version.version, trigger_type
        );
        self.publish(
            EventTopic::PlanInstanceCreated,
            EventSource::plan_instance(&plan_instance.id),
            json!({
                "plan_id": plan.id,
                "version": version.version,
                "trigger_at": trigger_at,
            }),
        )
        .await;

        self.lifecycle
            .start_plan_instance(&plan_instance, &version)
            .await?;
        Ok(ScheduleOutcome::Created(plan_instance))
    }

    async fn publish(&self, topic: EventTopic, source: EventSource, payload: serde_json::Value) {
        let event = Event::new(topic, source, self.clock.now()).with_payload(payload);
        self.event_bus.publish(event).await;
    }
}

/// 计划的定时触发器
pub struct PlanTrigger {
    plan: Plan,
    plans: Arc<dyn PlanRepository>,
    instances: Arc<dyn InstanceRepository>,
    strategy: Arc<PlanScheduleStrategy>,
    clock: SharedClock,
}

impl PlanTrigger {
    pub fn new(
        plan: Plan,
        plans: Arc<dyn PlanRepository>,
        instances: Arc<dyn InstanceRepository>,
        strategy: Arc<PlanScheduleStrategy>,
        clock: SharedClock,
    ) -> Self {
        Self {
            plan,
            plans,
            instances,
            strategy,
            clock,
        }
    }

    /// 最近一次定时触发的实例
    async fn latest_scheduled(&self) -> BrokerResult<Option<PlanInstance>> {
        Ok(self
            .instances
            .list_plan_instances(&self.plan.id)
            .await?
            .into_iter()
            .filter(|i| i.trigger_type == TriggerType::Schedule)
            .max_by_key(|i| i.trigger_at))
    }
}

#[async_trait]
impl Schedulable for PlanTrigger {
    fn schedule_id(&self) -> &str {
        &self.plan.id
    }

    fn fingerprint(&self) -> String {
        format!(
            "{}:{}",
            self.plan.current_version,
            serde_json::to_string(&self.plan.schedule_option).unwrap_or_default()
        )
    }

    async fn next_trigger_at(
        &self,
        last_fire: Option<DateTime<Utc>>,
    ) -> BrokerResult<Option<DateTime<Utc>>> {
        let latest = self.latest_scheduled().await?;
        let ctx = ScheduleContext {
            start_at: self
                .plan
                .schedule_option
                .start_at
                .or(Some(self.plan.created_at)),
            last_trigger_at: last_fire.or_else(|| latest.as_ref().map(|i| i.trigger_at)),
            last_finished_at: latest.as_ref().and_then(|i| i.finished_at),
            previous_running: latest
                .as_ref()
                .map(|i| i.status == PlanInstanceStatus::Running)
                .unwrap_or(false),
        };
        ScheduleCalculator::next_trigger(&self.plan.schedule_option, &ctx, self.clock.now())
    }

    async fn fire(&self, trigger_at: DateTime<Utc>) -> BrokerResult<()> {
        let plan = match self.plans.find_plan(&self.plan.id).await? {
            Some(plan) if plan.is_schedulable() => plan,
            Some(_) => {
                debug!("计划 {} 已不可调度，忽略本次触发", self.plan.id);
                return Ok(());
            }
            None => {
                warn!("计划 {} 已不存在，忽略本次触发", self.plan.id);
                return Ok(());
            }
        };
        match self
            .strategy
            .schedule(TriggerType::Schedule, &plan, trigger_at)
            .await?
        {
            ScheduleOutcome::Created(instance) => {
                debug!("计划 {} 定时触发，实例 {}", plan.id, instance.id);
            }
            ScheduleOutcome::SkippedOverlap {
                running_instance_id,
            } => {
                debug!(
                    "计划 {} 定时触发被跳过，实例 {} 仍在运行",
                    plan.id, running_instance_id
                );
            }
        }
        Ok(())
    }
}

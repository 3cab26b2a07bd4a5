//! 计划管理入口
//!
//! 创建、替换、启停和手动触发计划，并维护调度器中的定时任务。

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::info;
use uuid::Uuid;

use broker_core::{BrokerError, BrokerResult, SharedClock};
use broker_domain::{
    Event, EventSource, EventTopic, InstanceRepository, Plan, PlanDefinition, PlanInstance,
    PlanRepository, PlanVersion, TriggerType,
};
use broker_infrastructure::EventBus;

use crate::fail_handler::FailHandlerRegistry;
use crate::plan_strategy::{PlanScheduleStrategy, PlanTrigger, ScheduleOutcome};
use crate::schedule_calculator::ScheduleCalculator;
use crate::scheduler::Scheduler;

/// API触发时等待计划调度权的上限
const TRIGGER_OWNERSHIP_WAIT: Duration = Duration::from_secs(2);

pub struct PlanService {
    plans: Arc<dyn PlanRepository>,
    instances: Arc<dyn InstanceRepository>,
    strategy: Arc<PlanScheduleStrategy>,
    scheduler: Arc<Scheduler>,
    fail_handlers: Arc<FailHandlerRegistry>,
    event_bus: Arc<EventBus>,
    clock: SharedClock,
}

impl PlanService {
    pub fn new(
        plans: Arc<dyn PlanRepository>,
        instances: Arc<dyn InstanceRepository>,
        strategy: Arc<PlanScheduleStrategy>,
        scheduler: Arc<Scheduler>,
        fail_handlers: Arc<FailHandlerRegistry>,
        event_bus: Arc<EventBus>,
        clock: SharedClock,
    ) -> Self {
        Self {
            plans,
            instances,
            strategy,
            scheduler,
            fail_handlers,
            event_bus,
            clock,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    fn validate(&self, definition: &PlanDefinition) -> BrokerResult<broker_domain::JobGraph> {
        let graph = definition.validate()?;
        ScheduleCalculator::validate(&definition.schedule_option)?;
        for job in graph.jobs() {
            self.fail_handlers
                .ensure_known(job.fail_handler.as_deref())?;
        }
        Ok(graph)
    }

    /// 创建计划，版本号从1开始
    pub async fn create_plan(&self, definition: PlanDefinition) -> BrokerResult<Plan> {
        let graph = self.validate(&definition)?;
        let now = self.clock.now();
        let plan = Plan {
            id: Uuid::new_v4().to_string(),
            name: definition.name,
            description: definition.description,
            current_version: 1,
            trigger_type: definition.trigger_type,
            schedule_option: definition.schedule_option,
            allow_concurrent: definition.allow_concurrent,
            enabled: definition.enabled,
            created_at: now,
            updated_at: now,
        };
        self.plans
            .save_version(PlanVersion {
                plan_id: plan.id.clone(),
                version: 1,
                graph: Arc::new(graph),
                created_at: now,
            })
            .await?;
        self.plans.save_plan(&plan).await?;
        info!("计划 {} ({}) 已创建", plan.id, plan.name);

        self.refresh_schedule(&plan).await?;
        Ok(plan)
    }

    /// 用新定义替换计划，生成新版本；运行中的实例继续使用旧版本
    pub async fn replace_plan(
        &self,
        plan_id: &str,
        definition: PlanDefinition,
    ) -> BrokerResult<Plan> {
        let mut plan = self.get_plan(plan_id).await?;
        let graph = self.validate(&definition)?;
        let now = self.clock.now();
        let version = plan.current_version + 1;

        self.plans
            .save_version(PlanVersion {
                plan_id: plan.id.clone(),
                version,
                graph: Arc::new(graph),
                created_at: now,
            })
            .await?;
        plan.name = definition.name;
        plan.description = definition.description;
        plan.current_version = version;
        plan.trigger_type = definition.trigger_type;
        plan.schedule_option = definition.schedule_option;
        plan.allow_concurrent = definition.allow_concurrent;
        plan.enabled = definition.enabled;
        plan.updated_at = now;
        self.plans.save_plan(&plan).await?;
        info!("计划 {} 已更新到版本 {}", plan.id, version);

        self.refresh_schedule(&plan).await?;
        Ok(plan)
    }

    pub async fn enable_plan(&self, plan_id: &str) -> BrokerResult<Plan> {
        self.set_enabled(plan_id, true).await
    }

    pub async fn disable_plan(&self, plan_id: &str) -> BrokerResult<Plan> {
        self.set_enabled(plan_id, false).await
    }

    async fn set_enabled(&self, plan_id: &str, enabled: bool) -> BrokerResult<Plan> {
        let mut plan = self.get_plan(plan_id).await?;
        if plan.enabled != enabled {
            plan.enabled = enabled;
            plan.updated_at = self.clock.now();
            self.plans.save_plan(&plan).await?;
            info!(
                "计划 {} 已{}",
                plan.id,
                if enabled { "启用" } else { "停用" }
            );
        }
        self.refresh_schedule(&plan).await?;
        Ok(plan)
    }

    /// 通过API立即触发一次
    ///
    /// 集群模式下先取得计划的调度权，保证同一时刻只有一个节点为该计划创建实例。
    pub async fn trigger_plan(&self, plan_id: &str) -> BrokerResult<ScheduleOutcome> {
        let plan = self.get_plan(plan_id).await?;
        if !plan.enabled {
            return Err(BrokerError::Validation(format!("计划 {plan_id} 已停用")));
        }

        let coordinator = self.scheduler.coordinator();
        let was_owner = coordinator.is_owner(plan_id);
        if !coordinator
            .acquire_within(plan_id, TRIGGER_OWNERSHIP_WAIT)
            .await?
        {
            return Err(BrokerError::Lock(format!(
                "计划 {plan_id} 正由其它节点调度，请求需要转发到持有者"
            )));
        }

        let outcome = self
            .strategy
            .schedule(TriggerType::Api, &plan, self.clock.now())
            .await;
        // 本节点没有装配该计划时只临时持有调度权
        if !was_owner && !self.scheduler.is_scheduled(plan_id) {
            coordinator.release(plan_id).await?;
        }
        outcome
    }

    /// 按计划当前状态装配或取消定时任务
    async fn refresh_schedule(&self, plan: &Plan) -> BrokerResult<bool> {
        if plan.is_schedulable() {
            self.arm(plan).await
        } else {
            self.unschedule_plan(&plan.id).await
        }
    }

    async fn arm(&self, plan: &Plan) -> BrokerResult<bool> {
        let trigger = PlanTrigger::new(
            plan.clone(),
            self.plans.clone(),
            self.instances.clone(),
            self.strategy.clone(),
            self.clock.clone(),
        );
        let armed = self.scheduler.schedule(Arc::new(trigger)).await?;
        if armed {
            self.publish(
                EventTopic::PlanScheduled,
                &plan.id,
                json!({
                    "version": plan.current_version,
                    "next_trigger_at": self.scheduler.due_time(&plan.id),
                }),
            )
            .await;
        }
        Ok(armed)
    }

    /// 在本节点装配计划的定时任务
    pub async fn schedule_plan(&self, plan_id: &str) -> BrokerResult<bool> {
        let plan = self.get_plan(plan_id).await?;
        if !plan.is_schedulable() {
            return Ok(false);
        }
        self.arm(&plan).await
    }

    pub async fn unschedule_plan(&self, plan_id: &str) -> BrokerResult<bool> {
        let removed = self.scheduler.unschedule(plan_id).await?;
        if removed {
            self.publish(EventTopic::PlanUnscheduled, plan_id, json!({}))
                .await;
        }
        Ok(removed)
    }

    pub fn is_scheduling(&self, plan_id: &str) -> bool {
        self.scheduler.is_scheduled(plan_id)
    }

    /// 启动时为所有可调度的计划装配定时任务
    pub async fn restore_schedules(&self) -> BrokerResult<usize> {
        let mut armed = 0;
        for plan in self.plans.list_plans().await? {
            if plan.is_schedulable() && self.arm(&plan).await? {
                armed += 1;
            }
        }
        info!("已恢复 {} 个计划的定时调度", armed);
        Ok(armed)
    }

    pub async fn get_plan(&self, plan_id: &str) -> BrokerResult<Plan> {
        self.plans
            .find_plan(plan_id)
            .await?
            .ok_or_else(|| BrokerError::PlanNotFound {
                id: plan_id.to_string(),
            })
    }

    pub async fn list_plans(&self) -> BrokerResult<Vec<Plan>> {
        self.plans.list_plans().await
    }

    pub async fn plan_instances(&self, plan_id: &str) -> BrokerResult<Vec<PlanInstance>> {
        self.instances.list_plan_instances(plan_id).await
    }

    async fn publish(&self, topic: EventTopic, plan_id: &str, payload: serde_json::Value) {
        let event = Event::new(topic, EventSource::plan(plan_id), self.clock.now())
            .with_payload(payload);
        self.event_bus.publish(event).await;
    }
}

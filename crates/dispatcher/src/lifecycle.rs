//! 计划实例的运行推进
//!
//! 任务结果汇总到作业实例，作业实例结算后按DAG推进后继作业，
//! 全部作业结算后计划实例成功；失败处理器要求终止时计划实例失败。
//! 同一计划实例内的结算串行执行。

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use broker_core::{BrokerError, BrokerResult, SharedClock};
use broker_domain::{
    Event, EventSource, EventTopic, InstanceRepository, Job, JobInstance, JobInstanceStatus,
    PlanInstance, PlanInstanceStatus, PlanRepository, PlanVersion, Task, TaskReport,
    TaskReportStatus, TaskStatus,
};
use broker_infrastructure::EventBus;

use crate::dispatch_pipeline::{DispatchResult, TaskDispatchPipeline};
use crate::fail_handler::{FailHandlerRegistry, FailureContext, FailureKind};
use crate::task_store::TaskStore;

pub struct LifecycleManager {
    plans: Arc<dyn PlanRepository>,
    instances: Arc<dyn InstanceRepository>,
    tasks: Arc<TaskStore>,
    pipeline: Arc<TaskDispatchPipeline>,
    fail_handlers: Arc<FailHandlerRegistry>,
    event_bus: Arc<EventBus>,
    clock: SharedClock,
    plan_guards: DashMap<String, Arc<Mutex<()>>>,
}

impl LifecycleManager {
    pub fn new(
        plans: Arc<dyn PlanRepository>,
        tasks: Arc<TaskStore>,
        pipeline: Arc<TaskDispatchPipeline>,
        fail_handlers: Arc<FailHandlerRegistry>,
        event_bus: Arc<EventBus>,
        clock: SharedClock,
    ) -> Self {
        Self {
            plans,
            instances: tasks.repository().clone(),
            tasks,
            pipeline,
            fail_handlers,
            event_bus,
            clock,
            plan_guards: DashMap::new(),
        }
    }

    fn plan_guard(&self, plan_instance_id: &str) -> Arc<Mutex<()>> {
        self.plan_guards
            .entry(plan_instance_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 为计划实例的根作业创建作业实例并开始下发
    pub async fn start_plan_instance(
        self: &Arc<Self>,
        plan_instance: &PlanInstance,
        version: &PlanVersion,
    ) -> BrokerResult<Vec<JobInstance>> {
        let guard = self.plan_guard(&plan_instance.id);
        let _locked = guard.lock().await;

        let mut launched = Vec::new();
        for root in version.graph.roots() {
            let job = version
                .graph
                .job(root)
                .ok_or_else(|| BrokerError::JobNotFound { id: root.clone() })?;
            launched.push(self.launch_job(plan_instance, job, 0).await?);
        }
        Ok(launched)
    }

    async fn launch_job(
        self: &Arc<Self>,
        plan_instance: &PlanInstance,
        job: &Job,
        attempt: u32,
    ) -> BrokerResult<JobInstance> {
        let now = self.clock.now();
        let attributes = HashMap::from([
            (
                "trigger_at".to_string(),
                json!(plan_instance.trigger_at.to_rfc3339()),
            ),
            ("attempt".to_string(), json!(attempt)),
        ]);
        let job_instance = JobInstance::new(plan_instance, &job.id, attempt, attributes, now);
        self.instances.save_job_instance(&job_instance).await?;
        self.publish(
            EventTopic::JobInstanceCreated,
            EventSource::job_instance(&job_instance.id),
            json!({
                "plan_instance_id": plan_instance.id,
                "job_id": job.id,
                "attempt": attempt,
            }),
        )
        .await;
        info!(
            "作业实例 {} 已创建 (作业: {}, 第 {} 次尝试)",
            job_instance.id, job.id, attempt
        );

        let shard_total = job.dispatch_option.shard_count.max(1);
        for shard_index in 0..shard_total {
            let task = Task::new(&job_instance, shard_index, shard_total, now);
            self.tasks.insert(&task).await?;
            self.publish(
                EventTopic::TaskCreated,
                EventSource::task(&task.id),
                json!({ "job_instance_id": job_instance.id, "shard_index": shard_index }),
            )
            .await;
            self.spawn_dispatch(task.id, job.clone());
        }
        Ok(job_instance)
    }

    fn spawn_dispatch(self: &Arc<Self>, task_id: String, job: Job) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            match manager.pipeline.dispatch(&task_id, &job).await {
                Ok(DispatchResult::Accepted { worker_id }) => {
                    debug!("任务 {} 已由Worker {} 接收", task_id, worker_id);
                }
                Ok(DispatchResult::Failed {
                    kind,
                    terminate,
                    reason,
                }) => {
                    if let Err(e) = manager
                        .on_task_failed(&task_id, kind, terminate, &reason)
                        .await
                    {
                        error!("处理任务 {} 的失败出错: {}", task_id, e);
                    }
                }
                Err(BrokerError::InvalidTransition { .. }) => {
                    // Worker已经上报了更新的状态
                    debug!("任务 {} 的下发结果已过期", task_id);
                }
                Err(e) => {
                    error!("任务 {} 下发出错: {}", task_id, e);
                }
            }
        });
    }

    /// 处理Worker上报的任务状态
    ///
    /// 接收前到达的上报视为隐含接收；已接收直接上报成功时补上RUNNING。
    /// 已关闭的任务返回非法状态转换错误，状态不变。
    pub async fn on_task_report(self: &Arc<Self>, report: TaskReport) -> BrokerResult<Task> {
        let now = self.clock.now();
        let worker_id = report.worker_id.clone();
        let message = report.message.clone();
        let status = report.status;

        let (task, _) = self
            .tasks
            .update(&report.task_id, move |t| {
                if t.worker_id.as_deref() != Some(worker_id.as_str()) {
                    return Err(BrokerError::Validation(format!(
                        "任务 {} 未分配给Worker {}",
                        t.id, worker_id
                    )));
                }
                if t.status == TaskStatus::Dispatched {
                    t.transition(TaskStatus::Accepted, now)?;
                }
                match status {
                    TaskReportStatus::Running => t.transition(TaskStatus::Running, now)?,
                    TaskReportStatus::Succeeded => {
                        if t.status == TaskStatus::Accepted {
                            t.transition(TaskStatus::Running, now)?;
                        }
                        t.transition(TaskStatus::Succeeded, now)?;
                    }
                    TaskReportStatus::Failed => t.transition(TaskStatus::Failed, now)?,
                }
                if message.is_some() {
                    t.result_message = message;
                }
                Ok(())
            })
            .await?;

        match status {
            TaskReportStatus::Running => {
                self.publish_task(EventTopic::TaskRunning, &task).await;
            }
            TaskReportStatus::Succeeded => {
                self.publish_task(EventTopic::TaskSucceeded, &task).await;
                self.on_task_succeeded(&task).await?;
            }
            TaskReportStatus::Failed => {
                self.publish_task(EventTopic::TaskFailed, &task).await;
                let reason = task
                    .result_message
                    .clone()
                    .unwrap_or_else(|| "Worker报告执行失败".to_string());
                self.on_task_failed(&task.id, FailureKind::ExecutionFailed, false, &reason)
                    .await?;
            }
        }
        self.tasks.get(&task.id).await
    }

    async fn on_task_succeeded(self: &Arc<Self>, task: &Task) -> BrokerResult<()> {
        let guard = self.plan_guard(&task.plan_instance_id);
        let _locked = guard.lock().await;

        let mut job_instance = self.find_job_instance(&task.job_instance_id).await?;
        if job_instance.status.is_finished() {
            self.close_task(&task.id).await?;
            return Ok(());
        }

        let tasks = self.instances.list_tasks(&job_instance.id).await?;
        if !tasks.iter().all(|t| t.status == TaskStatus::Succeeded) {
            debug!(
                "作业实例 {} 仍有未完成的任务 ({} 个)",
                job_instance.id,
                tasks.iter().filter(|t| t.status != TaskStatus::Succeeded).count()
            );
            return Ok(());
        }

        job_instance.finish(JobInstanceStatus::Succeeded, self.clock.now())?;
        self.instances.save_job_instance(&job_instance).await?;
        info!("作业实例 {} 执行成功", job_instance.id);
        self.publish(
            EventTopic::JobInstanceSucceeded,
            EventSource::job_instance(&job_instance.id),
            json!({ "job_id": job_instance.job_id }),
        )
        .await;
        self.close_completed_tasks(&job_instance.id).await?;

        let plan_instance = self
            .find_plan_instance(&job_instance.plan_instance_id)
            .await?;
        if plan_instance.status.is_finished() {
            return Ok(());
        }
        let version = self.find_version(&plan_instance).await?;
        self.advance(&plan_instance, &version, &job_instance.job_id)
            .await
    }

    /// 任务进入FAILED后的作业级处理
    ///
    /// 计划实例被要求终止时直接失败；作业还有重试次数时创建新的作业实例；
    /// 否则交给失败处理器决定终止计划实例还是继续推进后继作业。
    async fn on_task_failed(
        self: &Arc<Self>,
        task_id: &str,
        kind: FailureKind,
        terminate: bool,
        reason: &str,
    ) -> BrokerResult<()> {
        let task = self.tasks.get(task_id).await?;
        let guard = self.plan_guard(&task.plan_instance_id);
        let _locked = guard.lock().await;

        let mut job_instance = self.find_job_instance(&task.job_instance_id).await?;
        if job_instance.status.is_finished() {
            self.close_task(task_id).await?;
            return Ok(());
        }

        job_instance.finish(JobInstanceStatus::Failed, self.clock.now())?;
        self.instances.save_job_instance(&job_instance).await?;
        warn!(
            "作业实例 {} 执行失败 (任务: {}, 类型: {}): {}",
            job_instance.id, task_id, kind, reason
        );
        self.publish(
            EventTopic::JobInstanceFailed,
            EventSource::job_instance(&job_instance.id),
            json!({
                "job_id": job_instance.job_id,
                "task_id": task_id,
                "kind": kind.as_str(),
                "reason": reason,
            }),
        )
        .await;
        self.close_completed_tasks(&job_instance.id).await?;

        let plan_instance = self
            .find_plan_instance(&job_instance.plan_instance_id)
            .await?;
        if plan_instance.status.is_finished() {
            return Ok(());
        }
        if terminate {
            return self.finish_plan_instance(plan_instance, PlanInstanceStatus::Failed, reason)
                .await;
        }

        let version = self.find_version(&plan_instance).await?;
        let job = version
            .graph
            .job(&job_instance.job_id)
            .ok_or_else(|| BrokerError::JobNotFound {
                id: job_instance.job_id.clone(),
            })?;

        if job_instance.attempt < job.retry {
            info!(
                "作业 {} 将进行第 {} 次重试 (上限: {})",
                job.id,
                job_instance.attempt + 1,
                job.retry
            );
            self.launch_job(&plan_instance, job, job_instance.attempt + 1)
                .await?;
            return Ok(());
        }

        let ctx = FailureContext {
            plan_instance_id: plan_instance.id.clone(),
            job_instance_id: job_instance.id.clone(),
            job_id: job.id.clone(),
            task_id: Some(task_id.to_string()),
            worker_id: task.worker_id.clone(),
            kind,
            reason: reason.to_string(),
        };
        if self
            .fail_handlers
            .process(job.fail_handler.as_deref(), &ctx)
            .await
        {
            self.finish_plan_instance(plan_instance, PlanInstanceStatus::Failed, reason)
                .await
        } else {
            info!("作业 {} 的失败不终止计划实例，继续推进", job.id);
            self.advance(&plan_instance, &version, &job.id).await
        }
    }

    /// 作业结算后启动前驱都已结算的后继作业，全部结算时计划实例成功
    async fn advance(
        self: &Arc<Self>,
        plan_instance: &PlanInstance,
        version: &PlanVersion,
        settled_job_id: &str,
    ) -> BrokerResult<()> {
        let job_instances = self.instances.list_job_instances(&plan_instance.id).await?;
        let mut latest: HashMap<String, JobInstance> = HashMap::new();
        for instance in job_instances {
            match latest.get(&instance.job_id) {
                Some(existing) if existing.attempt >= instance.attempt => {}
                _ => {
                    latest.insert(instance.job_id.clone(), instance);
                }
            }
        }
        let settled = |job_id: &str| {
            latest
                .get(job_id)
                .map(|ji| ji.status.is_finished())
                .unwrap_or(false)
        };

        let graph = &version.graph;
        let mut launched = 0;
        for child_id in graph.children(settled_job_id) {
            if latest.contains_key(child_id) {
                continue;
            }
            if graph.parents(child_id).iter().all(|p| settled(p.as_str())) {
                let child = graph
                    .job(child_id)
                    .ok_or_else(|| BrokerError::JobNotFound {
                        id: child_id.clone(),
                    })?;
                self.launch_job(plan_instance, child, 0).await?;
                launched += 1;
            }
        }

        if launched == 0 && graph.jobs().iter().all(|j| settled(j.id.as_str())) {
            self.finish_plan_instance(
                plan_instance.clone(),
                PlanInstanceStatus::Succeeded,
                "全部作业已结算",
            )
            .await?;
        }
        Ok(())
    }

    async fn finish_plan_instance(
        &self,
        plan_instance: PlanInstance,
        status: PlanInstanceStatus,
        reason: &str,
    ) -> BrokerResult<()> {
        let mut plan_instance = self.find_plan_instance(&plan_instance.id).await?;
        if plan_instance.status.is_finished() {
            return Ok(());
        }
        plan_instance.finish(status, self.clock.now())?;
        self.instances.save_plan_instance(&plan_instance).await?;

        let topic = match status {
            PlanInstanceStatus::Succeeded => {
                info!("计划实例 {} 执行成功", plan_instance.id);
                EventTopic::PlanInstanceSucceeded
            }
            _ => {
                warn!("计划实例 {} 执行失败: {}", plan_instance.id, reason);
                EventTopic::PlanInstanceFailed
            }
        };
        self.publish(
            topic,
            EventSource::plan_instance(&plan_instance.id),
            json!({ "plan_id": plan_instance.plan_id, "reason": reason }),
        )
        .await;
        self.plan_guards.remove(&plan_instance.id);
        Ok(())
    }

    async fn close_completed_tasks(&self, job_instance_id: &str) -> BrokerResult<()> {
        for task in self.instances.list_tasks(job_instance_id).await? {
            if matches!(task.status, TaskStatus::Succeeded | TaskStatus::Failed) {
                self.close_task(&task.id).await?;
            }
        }
        Ok(())
    }

    /// 关闭已结束的任务，未结束的任务等其结束上报时再关闭
    async fn close_task(&self, task_id: &str) -> BrokerResult<()> {
        let now = self.clock.now();
        let (task, closed) = self
            .tasks
            .update(task_id, |t| {
                if matches!(t.status, TaskStatus::Succeeded | TaskStatus::Failed) {
                    t.transition(TaskStatus::Closed, now)?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            })
            .await?;
        if closed {
            self.publish_task(EventTopic::TaskClosed, &task).await;
            self.tasks.release(task_id);
        }
        Ok(())
    }

    pub async fn job_instances(&self, plan_instance_id: &str) -> BrokerResult<Vec<JobInstance>> {
        self.instances.list_job_instances(plan_instance_id).await
    }

    pub async fn tasks(&self, job_instance_id: &str) -> BrokerResult<Vec<Task>> {
        self.instances.list_tasks(job_instance_id).await
    }

    async fn find_job_instance(&self, id: &str) -> BrokerResult<JobInstance> {
        self.instances
            .find_job_instance(id)
            .await?
            .ok_or_else(|| BrokerError::JobInstanceNotFound { id: id.to_string() })
    }

    async fn find_plan_instance(&self, id: &str) -> BrokerResult<PlanInstance> {
        self.instances
            .find_plan_instance(id)
            .await?
            .ok_or_else(|| BrokerError::PlanInstanceNotFound { id: id.to_string() })
    }

    async fn find_version(&self, plan_instance: &PlanInstance) -> BrokerResult<PlanVersion> {
        self.plans
            .find_version(&plan_instance.plan_id, plan_instance.version)
            .await?
            .ok_or_else(|| BrokerError::PlanVersionNotFound {
                plan_id: plan_instance.plan_id.clone(),
                version: plan_instance.version,
            })
    }

    async fn publish_task(&self, topic: EventTopic, task: &Task) {
        self.publish(
            topic,
            EventSource::task(&task.id),
            json!({
                "job_instance_id": task.job_instance_id,
                "worker_id": task.worker_id,
                "status": task.status.to_string(),
            }),
        )
        .await;
    }

    async fn publish(&self, topic: EventTopic, source: EventSource, payload: serde_json::Value) {
        let event = Event::new(topic, source, self.clock.now()).with_payload(payload);
        self.event_bus.publish(event).await;
    }
}

//! 任务下发流水线
//!
//! 筛选候选Worker、选择、下发，失败后交给失败处理器决定是否终止，
//! 否则退避后重新下发，直到被接收、被终止或次数用尽。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use broker_core::config::DispatchConfig;
use broker_core::{BrokerError, BrokerResult, SharedClock};
use broker_domain::{
    DispatchOutcome, Event, EventSource, EventTopic, Job, Task, TaskDispatchRequest, TaskStatus,
    Worker, WorkerClient,
};
use broker_infrastructure::{EventBus, MetricsCollector, WorkerRegistry};

use crate::fail_handler::{FailHandlerRegistry, FailureContext, FailureKind};
use crate::retry::RetryConfig;
use crate::selector::WorkerSelector;
use crate::strategies::SelectionContext;
use crate::task_store::TaskStore;

/// 一个任务下发的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Accepted {
        worker_id: String,
    },
    /// 任务已进入FAILED
    Failed {
        kind: FailureKind,
        /// 失败处理器要求终止计划实例
        terminate: bool,
        reason: String,
    },
}

pub struct TaskDispatchPipeline {
    registry: Arc<WorkerRegistry>,
    selector: Arc<WorkerSelector>,
    client: Arc<dyn WorkerClient>,
    tasks: Arc<TaskStore>,
    fail_handlers: Arc<FailHandlerRegistry>,
    event_bus: Arc<EventBus>,
    clock: SharedClock,
    retry: RetryConfig,
    dispatch_timeout: Duration,
    max_redispatch: u32,
}

impl TaskDispatchPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<WorkerRegistry>,
        selector: Arc<WorkerSelector>,
        client: Arc<dyn WorkerClient>,
        tasks: Arc<TaskStore>,
        fail_handlers: Arc<FailHandlerRegistry>,
        event_bus: Arc<EventBus>,
        clock: SharedClock,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            registry,
            selector,
            client,
            tasks,
            fail_handlers,
            event_bus,
            clock,
            retry: RetryConfig::from(config),
            dispatch_timeout: Duration::from_millis(config.timeout_ms),
            max_redispatch: config.max_redispatch,
        }
    }

    /// 下发任务，直到被接收或进入FAILED
    pub async fn dispatch(&self, task_id: &str, job: &Job) -> BrokerResult<DispatchResult> {
        let load_balance = self.selector.load_balance_for(job);
        let mut refused_by: HashSet<String> = HashSet::new();
        let mut attempt: u32 = 0;

        loop {
            let task = self.tasks.get(task_id).await?;
            let worker = self.choose_worker(job, &task, load_balance, &refused_by);

            let (kind, reason, worker_id) = match worker {
                None => {
                    warn!(
                        "任务 {} 没有可用的Worker (作业: {}, 策略: {})",
                        task_id, job.id, load_balance
                    );
                    (
                        FailureKind::NoAvailableWorker,
                        "没有满足条件的Worker".to_string(),
                        None,
                    )
                }
                Some(worker) => {
                    let outcome = self.deliver(&task, job, &worker).await?;
                    MetricsCollector::record_dispatch(load_balance.as_str(), &outcome);
                    match outcome {
                        DispatchOutcome::Accepted => {
                            return self.on_accepted(task_id, &worker).await;
                        }
                        DispatchOutcome::Refused { reason } => {
                            refused_by.insert(worker.id.clone());
                            self.on_refused(task_id, &worker, &reason, false).await?;
                            (FailureKind::Refused, reason, Some(worker.id))
                        }
                        DispatchOutcome::Unreachable { reason } => {
                            self.on_refused(task_id, &worker, &reason, true).await?;
                            (FailureKind::Unreachable, reason, Some(worker.id))
                        }
                    }
                }
            };

            let ctx = FailureContext {
                plan_instance_id: task.plan_instance_id.clone(),
                job_instance_id: task.job_instance_id.clone(),
                job_id: job.id.clone(),
                task_id: Some(task_id.to_string()),
                worker_id,
                kind,
                reason: reason.clone(),
            };
            if self
                .fail_handlers
                .process(job.fail_handler.as_deref(), &ctx)
                .await
            {
                info!("失败处理器终止任务 {} 的重新下发 ({})", task_id, kind);
                self.mark_failed(task_id, &reason).await?;
                return Ok(DispatchResult::Failed {
                    kind,
                    terminate: true,
                    reason,
                });
            }

            let max = self.max_redispatch;
            match self.tasks.update(task_id, |t| t.bump_redispatch(max)).await {
                Ok((_, count)) => {
                    debug!("任务 {} 第 {} 次重新下发", task_id, count);
                }
                Err(BrokerError::RedispatchExhausted { .. }) => {
                    warn!("任务 {} 重新下发次数已用尽 (上限: {})", task_id, max);
                    MetricsCollector::record_redispatch_exhausted();
                    self.mark_failed(task_id, &reason).await?;
                    return Ok(DispatchResult::Failed {
                        kind: FailureKind::RedispatchExhausted,
                        terminate: false,
                        reason,
                    });
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.retry.backoff(attempt)).await;
            attempt += 1;
        }
    }

    fn choose_worker(
        &self,
        job: &Job,
        task: &Task,
        load_balance: broker_domain::LoadBalanceType,
        refused_by: &HashSet<String>,
    ) -> Option<Worker> {
        let available = self.registry.available_workers();
        MetricsCollector::set_available_workers(available.len());
        let candidates = WorkerSelector::filter_candidates(job, available);

        // 优先避开已拒绝的Worker，全部拒绝过时仍从完整候选中选
        let fresh: Vec<Worker> = candidates
            .iter()
            .filter(|w| !refused_by.contains(&w.id))
            .cloned()
            .collect();
        let candidates = if fresh.is_empty() { candidates } else { fresh };

        let dispatch_key = task.dispatch_key();
        let ctx = SelectionContext {
            cursor_key: &job.id,
            dispatch_key: &dispatch_key,
            appoint_worker_id: job.dispatch_option.appoint_worker_id.as_deref(),
        };
        self.selector.select(load_balance, &candidates, &ctx)
    }

    async fn deliver(
        &self,
        task: &Task,
        job: &Job,
        worker: &Worker,
    ) -> BrokerResult<DispatchOutcome> {
        let now = self.clock.now();
        let worker_id = worker.id.clone();
        let (task, _) = self
            .tasks
            .update(&task.id, move |t| {
                t.worker_id = Some(worker_id);
                t.transition(TaskStatus::Dispatched, now)
            })
            .await?;
        self.publish(
            EventTopic::TaskDispatched,
            &task,
            json!({ "worker_id": worker.id, "redispatch_count": task.redispatch_count }),
        )
        .await;

        let request = TaskDispatchRequest::from_task(&task, job.executor_option.clone());
        debug!("下发任务 {} 到Worker {} ({})", task.id, worker.id, worker.address());
        let outcome = match tokio::time::timeout(
            self.dispatch_timeout,
            self.client.deliver(worker, &request),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => DispatchOutcome::Unreachable {
                reason: format!("下发超时 ({}ms)", self.dispatch_timeout.as_millis()),
            },
        };
        Ok(outcome)
    }

    async fn on_accepted(&self, task_id: &str, worker: &Worker) -> BrokerResult<DispatchResult> {
        let now = self.clock.now();
        // Worker可能在下发返回前已经上报了进度
        let (task, _) = self
            .tasks
            .update(task_id, |t| {
                if t.status == TaskStatus::Dispatched {
                    t.transition(TaskStatus::Accepted, now)
                } else {
                    Ok(())
                }
            })
            .await?;
        info!("任务 {} 已被Worker {} 接收", task_id, worker.id);
        self.publish(
            EventTopic::TaskAccepted,
            &task,
            json!({ "worker_id": worker.id }),
        )
        .await;
        Ok(DispatchResult::Accepted {
            worker_id: worker.id.clone(),
        })
    }

    async fn on_refused(
        &self,
        task_id: &str,
        worker: &Worker,
        reason: &str,
        unreachable: bool,
    ) -> BrokerResult<()> {
        let now = self.clock.now();
        let (task, _) = self
            .tasks
            .update(task_id, |t| {
                t.transition(TaskStatus::Refused, now)?;
                if unreachable {
                    t.worker_id = None;
                }
                t.result_message = Some(reason.to_string());
                Ok(())
            })
            .await?;

        let topic = if unreachable {
            warn!("Worker {} 不可达，任务 {}: {}", worker.id, task_id, reason);
            EventTopic::TaskUnreachable
        } else {
            warn!("Worker {} 拒绝任务 {}: {}", worker.id, task_id, reason);
            EventTopic::TaskRefused
        };
        self.publish(
            topic,
            &task,
            json!({ "worker_id": worker.id, "reason": reason }),
        )
        .await;
        Ok(())
    }

    async fn mark_failed(&self, task_id: &str, reason: &str) -> BrokerResult<()> {
        let now = self.clock.now();
        let (task, _) = self
            .tasks
            .update(task_id, |t| {
                t.transition(TaskStatus::Failed, now)?;
                t.result_message = Some(reason.to_string());
                Ok(())
            })
            .await?;
        self.publish(EventTopic::TaskFailed, &task, json!({ "reason": reason }))
            .await;
        Ok(())
    }

    async fn publish(&self, topic: EventTopic, task: &Task, payload: serde_json::Value) {
        let event = Event::new(topic, EventSource::task(&task.id), self.clock.now())
            .with_payload(payload);
        self.event_bus.publish(event).await;
    }
}

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};

use broker_core::{AppConfig, BrokerResult};
use broker_dispatcher::{Broker, FailureContext, JobFailHandler};
use broker_domain::{
    PlanInstanceStatus, Task, TaskReport, TaskReportStatus, TaskStatus, WorkerRegistration,
};
use broker_testing_utils::{RecordingSubscriber, ScriptedWorkerClient, TestEnv};

pub const WAIT: Duration = Duration::from_secs(3);

/// 记录收到的失败现场，终止与否由构造参数决定
pub struct RecordingFailHandler {
    name: String,
    terminate: bool,
    contexts: Mutex<Vec<FailureContext>>,
}

impl RecordingFailHandler {
    pub fn new(name: &str, terminate: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            terminate,
            contexts: Mutex::new(Vec::new()),
        })
    }

    pub fn contexts(&self) -> Vec<FailureContext> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobFailHandler for RecordingFailHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: &FailureContext) -> BrokerResult<()> {
        self.contexts.lock().unwrap().push(ctx.clone());
        Ok(())
    }

    fn terminate(&self, _ctx: &FailureContext) -> bool {
        self.terminate
    }
}

pub struct Harness {
    pub broker: Broker,
    pub client: ScriptedWorkerClient,
    pub events: RecordingSubscriber,
}

pub fn harness() -> Harness {
    harness_with(TestEnv::fast_config(), Vec::new())
}

pub fn harness_with(config: AppConfig, handlers: Vec<Arc<dyn JobFailHandler>>) -> Harness {
    let client = ScriptedWorkerClient::new();
    let events = RecordingSubscriber::new("recorder");
    let mut builder = Broker::builder(config)
        .worker_client(Arc::new(client.clone()))
        .subscriber(Arc::new(events.clone()));
    for handler in handlers {
        builder = builder.fail_handler(handler);
    }
    Harness {
        broker: builder.build().unwrap(),
        client,
        events,
    }
}

impl Harness {
    pub async fn register(&self, registration: WorkerRegistration) -> String {
        self.broker
            .worker_service
            .register(&registration)
            .await
            .unwrap()
            .worker_id
    }

    /// 计划实例下所有任务，按作业实例创建顺序
    pub async fn tasks_of(&self, plan_instance_id: &str) -> Vec<Task> {
        let mut tasks = Vec::new();
        for job_instance in self
            .broker
            .lifecycle
            .job_instances(plan_instance_id)
            .await
            .unwrap()
        {
            tasks.extend(self.broker.lifecycle.tasks(&job_instance.id).await.unwrap());
        }
        tasks
    }

    pub async fn wait_task_status(&self, plan_instance_id: &str, status: TaskStatus) -> Task {
        let deadline = Instant::now() + WAIT;
        loop {
            let tasks = self.tasks_of(plan_instance_id).await;
            if let Some(task) = tasks.into_iter().find(|t| t.status == status) {
                return task;
            }
            assert!(Instant::now() < deadline, "等待任务进入 {status} 超时");
            sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn plan_instance_status(&self, plan_instance_id: &str) -> PlanInstanceStatus {
        self.broker
            .instances
            .find_plan_instance(plan_instance_id)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    pub async fn wait_plan_instance(&self, plan_instance_id: &str, status: PlanInstanceStatus) {
        let reached = TestEnv::wait_for(
            || async move { self.plan_instance_status(plan_instance_id).await == status },
            WAIT,
        )
        .await;
        assert!(reached, "等待计划实例进入 {status:?} 超时");
    }

    pub async fn report(&self, task: &Task, status: TaskReportStatus) -> BrokerResult<Task> {
        self.broker
            .lifecycle
            .on_task_report(TaskReport {
                task_id: task.id.clone(),
                worker_id: task.worker_id.clone().unwrap_or_default(),
                status,
                message: None,
            })
            .await
    }

    /// 依次上报RUNNING和SUCCEEDED
    pub async fn complete(&self, task: &Task) -> Task {
        self.report(task, TaskReportStatus::Running).await.unwrap();
        self.report(task, TaskReportStatus::Succeeded).await.unwrap()
    }
}

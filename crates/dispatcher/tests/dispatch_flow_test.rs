use std::sync::Arc;
use std::time::Duration;

use broker_dispatcher::{FailureKind, JobFailHandler, ScheduleOutcome};
use broker_domain::{
    EventTopic, LoadBalanceType, Plan, PlanInstance, PlanInstanceStatus, TaskReportStatus,
    TaskStatus,
};
use broker_testing_utils::{
    JobBuilder, PlanDefinitionBuilder, ScriptedWorkerClient, TestEnv, WorkerRegistrationBuilder,
};

mod common;
use common::{harness, harness_with, Harness, RecordingFailHandler, WAIT};

async fn create_plan(h: &Harness, job: JobBuilder) -> Plan {
    h.broker
        .plan_service
        .create_plan(PlanDefinitionBuilder::new("dispatch").with_job(job.build()).build())
        .await
        .unwrap()
}

async fn trigger(h: &Harness, plan: &Plan) -> PlanInstance {
    match h.broker.plan_service.trigger_plan(&plan.id).await.unwrap() {
        ScheduleOutcome::Created(instance) => instance,
        other => panic!("计划没有创建实例: {other:?}"),
    }
}

async fn wait_events(h: &Harness, topic: EventTopic, count: usize) {
    let reached = TestEnv::wait_for(|| async move { h.events.count(topic) >= count }, WAIT).await;
    assert!(reached, "等待 {} 个 {} 事件超时", count, topic.as_str());
}

async fn wait_deliveries(h: &Harness, count: usize) {
    let reached =
        TestEnv::wait_for(|| async move { h.client.deliveries().len() >= count }, WAIT).await;
    assert!(reached, "等待 {count} 次下发超时");
}

#[tokio::test]
async fn test_single_task_is_accepted_and_succeeds() {
    let h = &harness();
    let w1 = h.register(WorkerRegistrationBuilder::new(9001).build()).await;
    let plan = create_plan(h, JobBuilder::new("j")).await;

    let instance = trigger(h, &plan).await;
    let task = h.wait_task_status(&instance.id, TaskStatus::Accepted).await;
    assert_eq!(task.worker_id.as_deref(), Some(w1.as_str()));
    assert_eq!(h.tasks_of(&instance.id).await.len(), 1);
    wait_events(h, EventTopic::TaskAccepted, 1).await;

    let running = h.report(&task, TaskReportStatus::Running).await.unwrap();
    assert_eq!(running.status, TaskStatus::Running);
    let finished = h.report(&task, TaskReportStatus::Succeeded).await.unwrap();
    assert_eq!(finished.status, TaskStatus::Closed);

    h.wait_plan_instance(&instance.id, PlanInstanceStatus::Succeeded)
        .await;
    assert_eq!(h.client.deliveries_to(&w1), 1);
    assert_eq!(h.broker.statistics.get(&w1).unwrap().dispatch_count, 1);

    wait_events(h, EventTopic::TaskClosed, 1).await;
    assert_eq!(
        h.events.topics_for(&task.id),
        vec![
            EventTopic::TaskCreated,
            EventTopic::TaskDispatched,
            EventTopic::TaskAccepted,
            EventTopic::TaskRunning,
            EventTopic::TaskSucceeded,
            EventTopic::TaskClosed,
        ]
    );
}

#[tokio::test]
async fn test_refused_task_is_redispatched_to_another_worker() {
    let handler = RecordingFailHandler::new("record", false);
    let h = &harness_with(
        TestEnv::fast_config(),
        vec![handler.clone() as Arc<dyn JobFailHandler>],
    );
    let a = h.register(WorkerRegistrationBuilder::new(9001).build()).await;
    let b = h.register(WorkerRegistrationBuilder::new(9002).build()).await;
    // 轮询从ID最小的Worker开始
    let (w1, w2) = if a < b { (a, b) } else { (b, a) };
    h.client
        .script(&w1, vec![ScriptedWorkerClient::refused("队列已满")]);

    let plan = create_plan(h, JobBuilder::new("j").with_fail_handler("record")).await;
    let instance = trigger(h, &plan).await;

    let task = h.wait_task_status(&instance.id, TaskStatus::Accepted).await;
    assert_eq!(task.worker_id.as_deref(), Some(w2.as_str()));
    assert_eq!(task.redispatch_count, 1);
    assert_eq!(h.client.deliveries_to(&w1), 1);
    assert_eq!(h.client.deliveries_to(&w2), 1);

    assert_eq!(h.broker.statistics.get(&w1).unwrap().dispatch_count, 1);
    assert_eq!(h.broker.statistics.get(&w2).unwrap().dispatch_count, 1);

    let contexts = handler.contexts();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].kind, FailureKind::Refused);
    assert_eq!(contexts[0].worker_id.as_deref(), Some(w1.as_str()));
    assert_eq!(contexts[0].task_id.as_deref(), Some(task.id.as_str()));

    wait_events(h, EventTopic::TaskAccepted, 1).await;
    assert_eq!(h.events.count(EventTopic::TaskRefused), 1);
}

#[tokio::test]
async fn test_terminating_handler_fails_plan_without_redispatch() {
    let handler = RecordingFailHandler::new("halt", true);
    let h = &harness_with(
        TestEnv::fast_config(),
        vec![handler.clone() as Arc<dyn JobFailHandler>],
    );
    let w1 = h.register(WorkerRegistrationBuilder::new(9001).build()).await;
    h.client.always(&w1, ScriptedWorkerClient::refused("维护中"));

    let plan = create_plan(h, JobBuilder::new("j").with_fail_handler("halt")).await;
    let instance = trigger(h, &plan).await;

    h.wait_plan_instance(&instance.id, PlanInstanceStatus::Failed)
        .await;
    let tasks = h.tasks_of(&instance.id).await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Closed);
    assert_eq!(tasks[0].redispatch_count, 0);
    assert_eq!(h.client.deliveries().len(), 1);

    let contexts = handler.contexts();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].kind, FailureKind::Refused);
}

#[tokio::test]
async fn test_unreachable_worker_exhausts_redispatch() {
    let mut config = TestEnv::fast_config();
    config.dispatch.max_redispatch = 1;
    let h = &harness_with(config, Vec::new());
    let w1 = h.register(WorkerRegistrationBuilder::new(9001).build()).await;
    // 超过200ms的下发超时
    h.client.delay(&w1, Duration::from_millis(500));

    let plan = create_plan(h, JobBuilder::new("j")).await;
    let instance = trigger(h, &plan).await;

    h.wait_plan_instance(&instance.id, PlanInstanceStatus::Failed)
        .await;
    let tasks = h.tasks_of(&instance.id).await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Closed);
    assert_eq!(tasks[0].redispatch_count, 1);
    assert_eq!(tasks[0].worker_id, None);
    assert_eq!(h.client.deliveries_to(&w1), 2);

    wait_events(h, EventTopic::TaskUnreachable, 2).await;
    assert_eq!(h.events.count(EventTopic::TaskRefused), 0);
    assert_eq!(h.events.count(EventTopic::TaskAccepted), 0);
}

#[tokio::test]
async fn test_no_available_worker_fails_after_retries() {
    let mut config = TestEnv::fast_config();
    config.dispatch.max_redispatch = 2;
    let h = &harness_with(config, Vec::new());
    h.register(
        WorkerRegistrationBuilder::new(9001)
            .with_executor("shell")
            .build(),
    )
    .await;

    let plan = create_plan(h, JobBuilder::new("j").with_executor("python")).await;
    let instance = trigger(h, &plan).await;

    h.wait_plan_instance(&instance.id, PlanInstanceStatus::Failed)
        .await;
    let tasks = h.tasks_of(&instance.id).await;
    assert_eq!(tasks[0].redispatch_count, 2);
    assert!(tasks[0].worker_id.is_none());
    assert!(h.client.deliveries().is_empty());
}

#[tokio::test]
async fn test_round_robin_spreads_shards() {
    let h = &harness();
    let w1 = h.register(WorkerRegistrationBuilder::new(9001).build()).await;
    let w2 = h.register(WorkerRegistrationBuilder::new(9002).build()).await;

    let plan = create_plan(
        h,
        JobBuilder::new("j")
            .with_shards(4)
            .with_load_balance(LoadBalanceType::RoundRobin),
    )
    .await;
    trigger(h, &plan).await;

    wait_deliveries(h, 4).await;
    assert_eq!(h.client.deliveries_to(&w1), 2);
    assert_eq!(h.client.deliveries_to(&w2), 2);
}

#[tokio::test]
async fn test_appointed_worker_receives_every_task() {
    let h = &harness();
    h.register(WorkerRegistrationBuilder::new(9001).build()).await;
    let w2 = h.register(WorkerRegistrationBuilder::new(9002).build()).await;
    h.register(WorkerRegistrationBuilder::new(9003).build()).await;

    let plan = create_plan(h, JobBuilder::new("j").with_shards(3).with_appoint(&w2)).await;
    trigger(h, &plan).await;

    wait_deliveries(h, 3).await;
    assert_eq!(h.client.deliveries_to(&w2), 3);
}

#[tokio::test]
async fn test_workers_with_full_queue_are_skipped() {
    let h = &harness();
    let busy = h
        .register(
            WorkerRegistrationBuilder::new(9001)
                .with_queue_remaining(0)
                .build(),
        )
        .await;
    let idle = h.register(WorkerRegistrationBuilder::new(9002).build()).await;

    let plan = create_plan(h, JobBuilder::new("j").with_shards(2)).await;
    let instance = trigger(h, &plan).await;

    let id = instance.id.as_str();
    let reached = TestEnv::wait_for(
        || async move {
            let tasks = h.tasks_of(id).await;
            tasks.len() == 2 && tasks.iter().all(|t| t.status == TaskStatus::Accepted)
        },
        WAIT,
    )
    .await;
    assert!(reached);
    assert_eq!(h.client.deliveries_to(&busy), 0);
    assert_eq!(h.client.deliveries_to(&idle), 2);
}

#[tokio::test]
async fn test_registration_is_idempotent_and_returns_topology() {
    let h = &harness();
    let service = &h.broker.worker_service;
    let registration = WorkerRegistrationBuilder::new(9001).build();

    let first = service.register(&registration).await.unwrap();
    let second = service.register(&registration).await.unwrap();
    assert_eq!(first.worker_id, second.worker_id);
    assert_ne!(first.session_token, second.session_token);
    assert_eq!(
        first.brokers,
        vec![broker_core::AppConfig::default().broker.address()]
    );
    assert_eq!(service.available_workers().len(), 1);
    wait_events(h, EventTopic::WorkerRegistered, 2).await;

    let blank = WorkerRegistrationBuilder::new(9002).with_host(" ").build();
    assert!(service.register(&blank).await.is_err());

    assert!(service.unregister(&first.worker_id).await);
    assert!(!service.unregister(&first.worker_id).await);
    assert!(service.available_workers().is_empty());
    wait_events(h, EventTopic::WorkerUnregistered, 1).await;
}

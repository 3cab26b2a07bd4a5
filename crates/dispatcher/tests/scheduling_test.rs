use std::sync::Arc;

use serde_json::json;
use tokio::time::{sleep, Duration};

use broker_core::{system_clock, BrokerError};
use broker_dispatcher::Broker;
use broker_domain::{
    ClusterRequest, EventTopic, InstanceRepository, Plan, PlanDefinition, PlanRepository,
    ScheduleOption, TriggerType,
};
use broker_infrastructure::{
    InMemoryDistributedLock, InMemoryInstanceRepository, InMemoryLockTable,
    InMemoryPlanRepository, LockCoordinator,
};
use broker_testing_utils::{
    JobBuilder, PlanDefinitionBuilder, RecordingSubscriber, ScriptedWorkerClient, TestEnv,
    WorkerRegistrationBuilder,
};

mod common;
use common::{harness, Harness, WAIT};

fn scheduled(name: &str, option: ScheduleOption) -> PlanDefinition {
    PlanDefinitionBuilder::new(name)
        .with_schedule(option)
        .allow_concurrent()
        .with_job(JobBuilder::new("j").build())
        .build()
}

async fn instance_count(h: &Harness, plan: &Plan) -> usize {
    h.broker
        .plan_service
        .plan_instances(&plan.id)
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn test_repeated_schedule_arms_one_timer() {
    let h = &harness();
    let plan = h
        .broker
        .plan_service
        .create_plan(scheduled("hourly", ScheduleOption::cron("0 0 * * * *")))
        .await
        .unwrap();
    assert!(h.broker.plan_service.is_scheduling(&plan.id));

    // 创建时已装配，重复装配不会产生新的定时任务
    assert!(!h.broker.plan_service.schedule_plan(&plan.id).await.unwrap());
    assert!(!h.broker.plan_service.schedule_plan(&plan.id).await.unwrap());
    assert_eq!(h.broker.scheduler.scheduled_ids(), vec![plan.id.clone()]);

    assert!(h.broker.plan_service.unschedule_plan(&plan.id).await.unwrap());
    assert!(!h.broker.plan_service.is_scheduling(&plan.id));
    assert!(!h.broker.plan_service.unschedule_plan(&plan.id).await.unwrap());

    assert!(h.broker.plan_service.schedule_plan(&plan.id).await.unwrap());
    assert!(!h.broker.plan_service.schedule_plan(&plan.id).await.unwrap());
    assert_eq!(h.broker.scheduler.scheduled_ids().len(), 1);

    let reached = TestEnv::wait_for(
        || async move { h.events.count(EventTopic::PlanScheduled) == 2 },
        WAIT,
    )
    .await;
    assert!(reached);
    assert_eq!(h.events.count(EventTopic::PlanUnscheduled), 1);
}

#[tokio::test]
async fn test_concurrent_schedule_calls_leave_one_timer() {
    let h = &harness();
    let plan = h
        .broker
        .plan_service
        .create_plan(scheduled("fast", ScheduleOption::fixed_rate(40)))
        .await
        .unwrap();
    h.broker.plan_service.unschedule_plan(&plan.id).await.unwrap();
    h.register(WorkerRegistrationBuilder::new(9001).build()).await;

    let service = &h.broker.plan_service;
    let (first, second) = tokio::join!(
        service.schedule_plan(&plan.id),
        service.schedule_plan(&plan.id)
    );
    first.unwrap();
    second.unwrap();
    assert_eq!(h.broker.scheduler.scheduled_ids().len(), 1);

    let reached = TestEnv::wait_for(
        || {
            let plan = &plan;
            async move { instance_count(h, plan).await >= 3 }
        },
        WAIT,
    )
    .await;
    assert!(reached);

    assert!(service.unschedule_plan(&plan.id).await.unwrap());
    let fired = instance_count(h, &plan).await;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(instance_count(h, &plan).await, fired);
}

#[tokio::test]
async fn test_fixed_rate_plan_fires_until_disabled() {
    let h = &harness();
    h.register(WorkerRegistrationBuilder::new(9001).build()).await;
    let plan = h
        .broker
        .plan_service
        .create_plan(scheduled("tick", ScheduleOption::fixed_rate(30)))
        .await
        .unwrap();

    let reached = TestEnv::wait_for(
        || {
            let plan = &plan;
            async move { instance_count(h, plan).await >= 2 }
        },
        WAIT,
    )
    .await;
    assert!(reached);

    let instances = h.broker.plan_service.plan_instances(&plan.id).await.unwrap();
    assert!(instances
        .iter()
        .all(|i| i.trigger_type == TriggerType::Schedule));

    h.broker.plan_service.disable_plan(&plan.id).await.unwrap();
    assert!(!h.broker.plan_service.is_scheduling(&plan.id));
    let fired = instance_count(h, &plan).await;
    sleep(Duration::from_millis(150)).await;
    assert_eq!(instance_count(h, &plan).await, fired);

    h.broker.plan_service.enable_plan(&plan.id).await.unwrap();
    assert!(h.broker.plan_service.is_scheduling(&plan.id));
}

#[tokio::test]
async fn test_once_plan_fires_a_single_time() {
    let h = &harness();
    h.register(WorkerRegistrationBuilder::new(9001).build()).await;
    let plan = h
        .broker
        .plan_service
        .create_plan(scheduled("once", ScheduleOption::once(None, 30)))
        .await
        .unwrap();

    let reached = TestEnv::wait_for(
        || {
            let plan = &plan;
            async move {
                instance_count(h, plan).await == 1
                    && !h.broker.plan_service.is_scheduling(&plan.id)
            }
        },
        WAIT,
    )
    .await;
    assert!(reached);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(instance_count(h, &plan).await, 1);
}

#[tokio::test]
async fn test_api_plan_is_not_scheduled() {
    let h = &harness();
    let plan = h
        .broker
        .plan_service
        .create_plan(
            PlanDefinitionBuilder::new("manual")
                .with_job(JobBuilder::new("j").build())
                .build(),
        )
        .await
        .unwrap();

    assert!(!h.broker.plan_service.is_scheduling(&plan.id));
    assert!(!h.broker.plan_service.schedule_plan(&plan.id).await.unwrap());

    let err = h.broker.plan_service.schedule_plan("missing").await.unwrap_err();
    assert!(matches!(err, BrokerError::PlanNotFound { .. }));
}

#[tokio::test]
async fn test_restore_schedules_on_start() {
    let plans: Arc<dyn PlanRepository> = Arc::new(InMemoryPlanRepository::new());
    let instances: Arc<dyn InstanceRepository> = Arc::new(InMemoryInstanceRepository::new());

    let first = Broker::builder(TestEnv::fast_config())
        .worker_client(Arc::new(ScriptedWorkerClient::new()))
        .repositories(plans.clone(), instances.clone())
        .build()
        .unwrap();
    let plan = first
        .plan_service
        .create_plan(scheduled("nightly", ScheduleOption::cron("0 0 2 * * *")))
        .await
        .unwrap();
    first.stop().await;

    let second = Broker::builder(TestEnv::fast_config())
        .worker_client(Arc::new(ScriptedWorkerClient::new()))
        .repositories(plans, instances)
        .build()
        .unwrap();
    assert!(!second.plan_service.is_scheduling(&plan.id));
    second.start().await.unwrap();
    assert!(second.plan_service.is_scheduling(&plan.id));
    assert!(second.scheduler.due_time(&plan.id).is_some());
    second.stop().await;
}

#[tokio::test]
async fn test_cluster_requests() {
    let h = &harness();
    let plan = h
        .broker
        .plan_service
        .create_plan(scheduled("cluster", ScheduleOption::cron("0 0 * * * *")))
        .await
        .unwrap();
    let handler = &h.broker.cluster_handler;

    let info = handler.handle(ClusterRequest::NodeInfo).await;
    assert!(info.success);
    assert_eq!(info.data.unwrap()["port"], json!(8500));

    let scheduling = handler
        .handle(ClusterRequest::IsScheduling {
            plan_id: plan.id.clone(),
        })
        .await;
    assert_eq!(scheduling.data, Some(json!(true)));

    let removed = handler
        .handle_json(&format!(r#"{{"type":"unschedule","plan_id":"{}"}}"#, plan.id))
        .await;
    assert!(removed.success);
    assert_eq!(removed.data, Some(json!({ "removed": true })));

    let armed = handler
        .handle(ClusterRequest::Schedule {
            plan_id: plan.id.clone(),
        })
        .await;
    assert_eq!(armed.data, Some(json!({ "armed": true })));

    let missing = handler
        .handle(ClusterRequest::Schedule {
            plan_id: "missing".to_string(),
        })
        .await;
    assert!(!missing.success);
    assert!(missing.error_message.is_some());

    let garbage = handler.handle_json("{not json").await;
    assert!(!garbage.success);
}

struct Node {
    broker: Broker,
    client: ScriptedWorkerClient,
}

fn cluster_node(
    holder: &str,
    table: &Arc<InMemoryLockTable>,
    plans: &Arc<dyn PlanRepository>,
    instances: &Arc<dyn InstanceRepository>,
) -> Node {
    let clock = system_clock();
    let lock = InMemoryDistributedLock::with_holder(table.clone(), clock.clone(), holder);
    let client = ScriptedWorkerClient::new();
    let broker = Broker::builder(TestEnv::fast_config())
        .clock(clock)
        .worker_client(Arc::new(client.clone()))
        .coordinator(Arc::new(LockCoordinator::new(Arc::new(lock), 30_000)))
        .repositories(plans.clone(), instances.clone())
        .subscriber(Arc::new(RecordingSubscriber::new(holder)))
        .build()
        .unwrap();
    Node { broker, client }
}

#[tokio::test]
async fn test_only_lock_holder_fires_and_failover_after_release() {
    let table = InMemoryLockTable::new();
    let plans: Arc<dyn PlanRepository> = Arc::new(InMemoryPlanRepository::new());
    let instances: Arc<dyn InstanceRepository> = Arc::new(InMemoryInstanceRepository::new());
    let a = &cluster_node("node-a", &table, &plans, &instances);
    let b = &cluster_node("node-b", &table, &plans, &instances);
    for node in [a, b] {
        node.broker
            .worker_service
            .register(&WorkerRegistrationBuilder::new(9001).build())
            .await
            .unwrap();
    }

    let plan = a
        .broker
        .plan_service
        .create_plan(scheduled("shared", ScheduleOption::fixed_rate(30)))
        .await
        .unwrap();
    let plan_id = plan.id.as_str();
    let reached = TestEnv::wait_for(
        || async move { a.broker.scheduler.coordinator().is_owner(plan_id) },
        WAIT,
    )
    .await;
    assert!(reached);
    assert!(b.broker.plan_service.schedule_plan(&plan.id).await.unwrap());

    let reached =
        TestEnv::wait_for(|| async move { a.client.deliveries().len() >= 3 }, WAIT).await;
    assert!(reached);
    assert!(b.client.deliveries().is_empty());
    assert!(!b.broker.scheduler.coordinator().is_owner(&plan.id));

    // 释放锁后由另一个节点接管
    assert!(a.broker.plan_service.unschedule_plan(&plan.id).await.unwrap());
    let reached =
        TestEnv::wait_for(|| async move { !b.client.deliveries().is_empty() }, WAIT).await;
    assert!(reached);
    assert!(b.broker.scheduler.coordinator().is_owner(&plan.id));

    let handled_by_a = a.client.deliveries().len();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(a.client.deliveries().len(), handled_by_a);

    a.broker.stop().await;
    b.broker.stop().await;
}

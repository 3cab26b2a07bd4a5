//! Broker组件装配

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use broker_core::config::ClusterMode;
use broker_core::{system_clock, AppConfig, BrokerError, BrokerResult, SharedClock};
use broker_domain::{
    BrokerNode, InstanceRepository, LoadBalanceType, PlanRepository, WorkerClient,
};
use broker_infrastructure::{
    EventBus, EventSubscriber, HttpWorkerClient, InMemoryInstanceRepository,
    InMemoryPlanRepository, LbStatisticsRepository, ScheduleCoordinator, StandaloneCoordinator,
    WorkerHealthTracker, WorkerRegistry,
};

use crate::cluster_handler::ClusterHandler;
use crate::dispatch_pipeline::TaskDispatchPipeline;
use crate::fail_handler::{FailHandlerRegistry, JobFailHandler};
use crate::lifecycle::LifecycleManager;
use crate::plan_service::PlanService;
use crate::plan_strategy::PlanScheduleStrategy;
use crate::scheduler::Scheduler;
use crate::selector::WorkerSelector;
use crate::task_store::TaskStore;
use crate::worker_service::WorkerService;

/// 装配完成的Broker
pub struct Broker {
    pub config: AppConfig,
    pub clock: SharedClock,
    pub event_bus: Arc<EventBus>,
    pub plans: Arc<dyn PlanRepository>,
    pub instances: Arc<dyn InstanceRepository>,
    pub registry: Arc<WorkerRegistry>,
    pub health: Arc<WorkerHealthTracker>,
    pub statistics: Arc<LbStatisticsRepository>,
    pub fail_handlers: Arc<FailHandlerRegistry>,
    pub lifecycle: Arc<LifecycleManager>,
    pub strategy: Arc<PlanScheduleStrategy>,
    pub scheduler: Arc<Scheduler>,
    pub plan_service: Arc<PlanService>,
    pub worker_service: Arc<WorkerService>,
    pub cluster_handler: Arc<ClusterHandler>,
}

pub struct BrokerBuilder {
    config: AppConfig,
    clock: Option<SharedClock>,
    worker_client: Option<Arc<dyn WorkerClient>>,
    coordinator: Option<Arc<dyn ScheduleCoordinator>>,
    plans: Option<Arc<dyn PlanRepository>>,
    instances: Option<Arc<dyn InstanceRepository>>,
    fail_handlers: Vec<Arc<dyn JobFailHandler>>,
    subscribers: Vec<Arc<dyn EventSubscriber>>,
}

impl Broker {
    pub fn builder(config: AppConfig) -> BrokerBuilder {
        BrokerBuilder {
            config,
            clock: None,
            worker_client: None,
            coordinator: None,
            plans: None,
            instances: None,
            fail_handlers: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    /// 恢复定时调度，按配置启动Worker过期清理
    pub async fn start(&self) -> BrokerResult<Option<JoinHandle<()>>> {
        self.plan_service.restore_schedules().await?;
        let sweep = if self.config.worker_health.enable_sweep {
            let interval = Duration::from_secs(self.config.worker_health.sweep_interval_seconds);
            Some(self.health.start_sweep(interval).await)
        } else {
            None
        };
        info!("Broker {} 已启动", self.config.broker.address());
        Ok(sweep)
    }

    pub async fn stop(&self) {
        self.scheduler.shutdown();
        self.health.stop_sweep().await;
        info!("Broker {} 已停止", self.config.broker.address());
    }
}

impl BrokerBuilder {
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn worker_client(mut self, client: Arc<dyn WorkerClient>) -> Self {
        self.worker_client = Some(client);
        self
    }

    pub fn coordinator(mut self, coordinator: Arc<dyn ScheduleCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// 多个Broker共用同一份计划和实例存储
    pub fn repositories(
        mut self,
        plans: Arc<dyn PlanRepository>,
        instances: Arc<dyn InstanceRepository>,
    ) -> Self {
        self.plans = Some(plans);
        self.instances = Some(instances);
        self
    }

    pub fn fail_handler(mut self, handler: Arc<dyn JobFailHandler>) -> Self {
        self.fail_handlers.push(handler);
        self
    }

    pub fn subscriber(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// 需要在Tokio运行时中调用，事件订阅者的消费任务会立即启动
    pub fn build(self) -> BrokerResult<Broker> {
        let config = self.config;
        config
            .validate()
            .map_err(|e| BrokerError::Configuration(e.to_string()))?;

        let clock = self.clock.unwrap_or_else(system_clock);
        let node_address = config.broker.address();

        let event_bus = Arc::new(EventBus::new(&config.event_bus));
        for subscriber in self.subscribers {
            event_bus.subscribe(subscriber);
        }

        let plans: Arc<dyn PlanRepository> = match self.plans {
            Some(plans) => plans,
            None => Arc::new(InMemoryPlanRepository::new()),
        };
        let instances: Arc<dyn InstanceRepository> = match self.instances {
            Some(instances) => instances,
            None => Arc::new(InMemoryInstanceRepository::new()),
        };

        let mut brokers = vec![node_address.clone()];
        if config.cluster.mode == ClusterMode::Cluster {
            brokers.extend(config.cluster.peers.iter().cloned());
        }
        let registry = Arc::new(WorkerRegistry::new(
            clock.clone(),
            chrono::Duration::seconds(config.worker_health.liveness_window_seconds as i64),
            brokers,
        ));
        let health = Arc::new(WorkerHealthTracker::new(
            registry.clone(),
            event_bus.clone(),
            clock.clone(),
        ));

        let statistics = Arc::new(LbStatisticsRepository::new(clock.clone()));
        let default_load_balance: LoadBalanceType =
            config.dispatch.default_load_balance.parse()?;
        let selector = Arc::new(WorkerSelector::new(
            statistics.clone(),
            default_load_balance,
        ));

        let fail_handlers = Arc::new(FailHandlerRegistry::new());
        for handler in self.fail_handlers {
            fail_handlers.register(handler);
        }

        let worker_client: Arc<dyn WorkerClient> = match self.worker_client {
            Some(client) => client,
            None => Arc::new(HttpWorkerClient::new(Duration::from_millis(
                config.dispatch.timeout_ms,
            ))?),
        };

        let tasks = Arc::new(TaskStore::new(instances.clone()));
        let pipeline = Arc::new(TaskDispatchPipeline::new(
            registry.clone(),
            selector,
            worker_client,
            tasks.clone(),
            fail_handlers.clone(),
            event_bus.clone(),
            clock.clone(),
            &config.dispatch,
        ));
        let lifecycle = Arc::new(LifecycleManager::new(
            plans.clone(),
            tasks,
            pipeline,
            fail_handlers.clone(),
            event_bus.clone(),
            clock.clone(),
        ));
        let strategy = Arc::new(PlanScheduleStrategy::new(
            plans.clone(),
            instances.clone(),
            lifecycle.clone(),
            event_bus.clone(),
            clock.clone(),
            config.scheduler.allow_concurrent_instances,
        ));

        let coordinator: Arc<dyn ScheduleCoordinator> = match self.coordinator {
            Some(coordinator) => coordinator,
            None => Arc::new(StandaloneCoordinator::new(node_address.clone())),
        };
        let node_id = coordinator.node_id().to_string();
        let scheduler = Arc::new(Scheduler::new(coordinator, clock.clone()));

        let plan_service = Arc::new(PlanService::new(
            plans.clone(),
            instances.clone(),
            strategy.clone(),
            scheduler.clone(),
            fail_handlers.clone(),
            event_bus.clone(),
            clock.clone(),
        ));
        let worker_service = Arc::new(WorkerService::new(
            registry.clone(),
            health.clone(),
            event_bus.clone(),
            clock.clone(),
        ));
        let cluster_handler = Arc::new(ClusterHandler::new(
            BrokerNode {
                node_id,
                host: config.broker.host.clone(),
                port: config.broker.port,
                protocol: config.broker.protocol.clone(),
            },
            plan_service.clone(),
        ));

        Ok(Broker {
            config,
            clock,
            event_bus,
            plans,
            instances,
            registry,
            health,
            statistics,
            fail_handlers,
            lifecycle,
            strategy,
            scheduler,
            plan_service,
            worker_service,
            cluster_handler,
        })
    }
}

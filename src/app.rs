use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use broker_core::config::{ClusterMode, LockBackend};
use broker_core::{system_clock, AppConfig, DistributedLock};
use broker_dispatcher::Broker;
use broker_domain::PlanDefinition;
use broker_infrastructure::{
    InMemoryDistributedLock, InMemoryLockTable, LockCoordinator, MetricsSubscriber,
    RedisDistributedLock, ScheduleCoordinator, StandaloneCoordinator,
};

/// Broker进程
pub struct Application {
    config: AppConfig,
    broker: Arc<Broker>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let coordinator = create_coordinator(&config).await?;
        let broker = Broker::builder(config.clone())
            .coordinator(coordinator)
            .subscriber(Arc::new(MetricsSubscriber::new()))
            .build()
            .context("装配Broker失败")?;

        Ok(Self {
            config,
            broker: Arc::new(broker),
        })
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// 从JSON文件导入计划定义，返回导入数量
    pub async fn load_plans(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("读取计划文件失败: {}", path.display()))?;
        let definitions: Vec<PlanDefinition> =
            serde_json::from_str(&text).context("解析计划文件失败")?;

        let mut loaded = 0;
        for definition in definitions {
            let name = definition.name.clone();
            match self.broker.plan_service.create_plan(definition).await {
                Ok(plan) => {
                    info!("导入计划 {} ({})", plan.name, plan.id);
                    loaded += 1;
                }
                Err(e) => warn!("计划 {} 导入失败: {}", name, e),
            }
        }
        Ok(loaded)
    }

    /// 启动Broker并阻塞到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let sweep = self.broker.start().await.context("启动Broker失败")?;
        info!(
            "Broker运行中: 节点 {}，集群模式 {:?}",
            self.config.broker.address(),
            self.config.cluster.mode
        );

        let _ = shutdown_rx.recv().await;
        info!("开始停止Broker");
        self.broker.stop().await;
        if let Some(handle) = sweep {
            if let Err(e) = handle.await {
                error!("Worker清理任务退出异常: {e}");
            }
        }
        Ok(())
    }
}

async fn create_coordinator(config: &AppConfig) -> Result<Arc<dyn ScheduleCoordinator>> {
    let address = config.broker.address();
    if config.cluster.mode == ClusterMode::Standalone {
        return Ok(Arc::new(StandaloneCoordinator::new(address)));
    }

    let lock: Arc<dyn DistributedLock> = match config.cluster.lock_backend {
        LockBackend::Memory => {
            let host = hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string());
            Arc::new(InMemoryDistributedLock::with_holder(
                InMemoryLockTable::new(),
                system_clock(),
                format!("{host}@{address}"),
            ))
        }
        LockBackend::Redis => Arc::new(
            RedisDistributedLock::connect(
                &config.cluster.redis_url,
                config.cluster.lock_key_prefix.clone(),
            )
            .await
            .with_context(|| format!("连接Redis失败: {}", config.cluster.redis_url))?,
        ),
    };
    info!("集群模式使用 {:?} 分布式锁", config.cluster.lock_backend);
    Ok(Arc::new(LockCoordinator::new(
        lock,
        config.cluster.lock_expire_ms,
    )))
}

//! 调度归属协调
//!
//! 调度核心只依赖 [`ScheduleCoordinator`]，单节点和集群模式在装配时选择实现。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker_core::{BrokerResult, DistributedLock};
use dashmap::DashSet;
use tracing::debug;

use crate::lock::acquire_with_backoff;

#[async_trait]
pub trait ScheduleCoordinator: Send + Sync {
    /// 尝试获取(或续期)实体的调度权，失败表示其它节点正在调度
    async fn acquire(&self, entity_id: &str) -> BrokerResult<bool>;

    /// 在 `max_wait` 内退避重试获取调度权
    async fn acquire_within(&self, entity_id: &str, max_wait: Duration) -> BrokerResult<bool>;

    async fn release(&self, entity_id: &str) -> BrokerResult<bool>;

    /// 本节点最近一次是否成功获取了该实体的调度权
    fn is_owner(&self, entity_id: &str) -> bool;

    fn node_id(&self) -> &str;
}

pub fn lock_name(entity_id: &str) -> String {
    format!("schedule:{entity_id}")
}

/// 单节点模式，本节点拥有所有实体
pub struct StandaloneCoordinator {
    node_id: String,
    owned: DashSet<String>,
}

impl StandaloneCoordinator {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            owned: DashSet::new(),
        }
    }
}

#[async_trait]
impl ScheduleCoordinator for StandaloneCoordinator {
    async fn acquire(&self, entity_id: &str) -> BrokerResult<bool> {
        self.owned.insert(entity_id.to_string());
        Ok(true)
    }

    async fn acquire_within(&self, entity_id: &str, _max_wait: Duration) -> BrokerResult<bool> {
        self.acquire(entity_id).await
    }

    async fn release(&self, entity_id: &str) -> BrokerResult<bool> {
        Ok(self.owned.remove(entity_id).is_some())
    }

    fn is_owner(&self, entity_id: &str) -> bool {
        self.owned.contains(entity_id)
    }

    fn node_id(&self) -> &str {
        &self.node_id
    }
}

/// 集群模式，通过分布式锁决定调度归属
pub struct LockCoordinator {
    lock: Arc<dyn DistributedLock>,
    expire_ms: u64,
    owned: DashSet<String>,
}

impl LockCoordinator {
    pub fn new(lock: Arc<dyn DistributedLock>, expire_ms: u64) -> Self {
        Self {
            lock,
            expire_ms,
            owned: DashSet::new(),
        }
    }
}

#[async_trait]
impl ScheduleCoordinator for LockCoordinator {
    async fn acquire(&self, entity_id: &str) -> BrokerResult<bool> {
        let acquired = self
            .lock
            .try_lock(&lock_name(entity_id), self.expire_ms)
            .await?;
        if acquired {
            self.owned.insert(entity_id.to_string());
        } else {
            self.owned.remove(entity_id);
            debug!("实体 {} 由其它节点调度，跳过", entity_id);
        }
        Ok(acquired)
    }

    async fn acquire_within(&self, entity_id: &str, max_wait: Duration) -> BrokerResult<bool> {
        let acquired = acquire_with_backoff(
            self.lock.as_ref(),
            &lock_name(entity_id),
            self.expire_ms,
            max_wait,
        )
        .await?;
        if acquired {
            self.owned.insert(entity_id.to_string());
        }
        Ok(acquired)
    }

    async fn release(&self, entity_id: &str) -> BrokerResult<bool> {
        self.owned.remove(entity_id);
        self.lock.unlock(&lock_name(entity_id)).await
    }

    fn is_owner(&self, entity_id: &str) -> bool {
        self.owned.contains(entity_id)
    }

    fn node_id(&self) -> &str {
        self.lock.holder()
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use broker_core::{BrokerResult, DistributedLock, SharedClock};
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use super::clamp_expire_ms;

/// 锁记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub name: String,
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

/// 进程内共享的锁表，多个持有者句柄指向同一张表
#[derive(Debug, Default)]
pub struct InMemoryLockTable {
    records: DashMap<String, LockRecord>,
}

impl InMemoryLockTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, name: &str) -> Option<LockRecord> {
        self.records.get(name).map(|r| r.value().clone())
    }
}

/// 基于内存锁表的分布式锁，单进程或测试中使用
pub struct InMemoryDistributedLock {
    table: Arc<InMemoryLockTable>,
    holder: String,
    clock: SharedClock,
}

impl InMemoryDistributedLock {
    pub fn new(table: Arc<InMemoryLockTable>, clock: SharedClock) -> Self {
        Self::with_holder(table, clock, Uuid::new_v4().to_string())
    }

    pub fn with_holder(
        table: Arc<InMemoryLockTable>,
        clock: SharedClock,
        holder: impl Into<String>,
    ) -> Self {
        Self {
            table,
            holder: holder.into(),
            clock,
        }
    }
}

#[async_trait]
impl DistributedLock for InMemoryDistributedLock {
    async fn try_lock(&self, name: &str, expire_ms: u64) -> BrokerResult<bool> {
        let now = self.clock.now();
        let expire_ms = i64::try_from(clamp_expire_ms(expire_ms)).unwrap_or(i64::MAX);
        let expires_at = now
            .checked_add_signed(Duration::milliseconds(expire_ms))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        match self.table.records.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                if record.holder == self.holder || record.expires_at <= now {
                    record.holder = self.holder.clone();
                    record.expires_at = expires_at;
                    Ok(true)
                } else {
                    debug!("锁 {} 已被 {} 持有", name, record.holder);
                    Ok(false)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(LockRecord {
                    name: name.to_string(),
                    holder: self.holder.clone(),
                    expires_at,
                });
                Ok(true)
            }
        }
    }

    async fn unlock(&self, name: &str) -> BrokerResult<bool> {
        Ok(self
            .table
            .records
            .remove_if(name, |_, record| record.holder == self.holder)
            .is_some())
    }

    fn holder(&self) -> &str {
        &self.holder
    }
}

use async_trait::async_trait;
use broker_core::{BrokerError, BrokerResult, DistributedLock};
use redis::aio::ConnectionManager;
use tracing::{debug, info};
use uuid::Uuid;

use super::clamp_expire_ms;

/// 空闲时加锁，持有者相同时续期
const TRY_LOCK_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == false then
    redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
    return 1
elseif current == ARGV[1] then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

const UNLOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// 基于Redis的分布式锁，过期由Redis的PX保证
pub struct RedisDistributedLock {
    conn: ConnectionManager,
    holder: String,
    key_prefix: String,
}

impl RedisDistributedLock {
    pub async fn connect(redis_url: &str, key_prefix: impl Into<String>) -> BrokerResult<Self> {
        info!("连接Redis分布式锁后端: {}", redis_url);

        let client =
            redis::Client::open(redis_url).map_err(|e| BrokerError::Lock(e.to_string()))?;
        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(|e| BrokerError::Lock(e.to_string()))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Lock(e.to_string()))?;

        Ok(Self {
            conn,
            holder: Uuid::new_v4().to_string(),
            key_prefix: key_prefix.into(),
        })
    }

    fn build_key(&self, name: &str) -> String {
        format!("{}{}", self.key_prefix, name)
    }
}

#[async_trait]
impl DistributedLock for RedisDistributedLock {
    async fn try_lock(&self, name: &str, expire_ms: u64) -> BrokerResult<bool> {
        let mut conn = self.conn.clone();
        let acquired: i32 = redis::cmd("EVAL")
            .arg(TRY_LOCK_SCRIPT)
            .arg(1)
            .arg(self.build_key(name))
            .arg(&self.holder)
            .arg(clamp_expire_ms(expire_ms))
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Lock(e.to_string()))?;

        if acquired == 0 {
            debug!("锁 {} 已被其它节点持有", name);
        }
        Ok(acquired == 1)
    }

    async fn unlock(&self, name: &str) -> BrokerResult<bool> {
        let mut conn = self.conn.clone();
        let released: i32 = redis::cmd("EVAL")
            .arg(UNLOCK_SCRIPT)
            .arg(1)
            .arg(self.build_key(name))
            .arg(&self.holder)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Lock(e.to_string()))?;
        Ok(released == 1)
    }

    fn holder(&self) -> &str {
        &self.holder
    }
}

use std::time::Duration;

use broker_core::{BrokerResult, DistributedLock};
use tokio::time::Instant;
use tracing::debug;

const INITIAL_DELAY: Duration = Duration::from_millis(10);
const MAX_STEP_DELAY: Duration = Duration::from_millis(500);

/// 在 `max_wait` 内按指数退避轮询获取锁，超时返回 `Ok(false)`
pub async fn acquire_with_backoff(
    lock: &dyn DistributedLock,
    name: &str,
    expire_ms: u64,
    max_wait: Duration,
) -> BrokerResult<bool> {
    let deadline = Instant::now() + max_wait;
    let mut delay = INITIAL_DELAY;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if lock.try_lock(name, expire_ms).await? {
            return Ok(true);
        }

        let now = Instant::now();
        if now >= deadline {
            debug!("{} 次尝试后仍未获取锁 {}", attempts, name);
            return Ok(false);
        }
        tokio::time::sleep(delay.min(deadline - now)).await;
        delay = (delay * 2).min(MAX_STEP_DELAY);
    }
}

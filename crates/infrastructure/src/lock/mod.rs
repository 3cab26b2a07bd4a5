pub mod backoff;
pub mod memory;
pub mod redis_lock;

pub use backoff::acquire_with_backoff;
pub use memory::{InMemoryDistributedLock, InMemoryLockTable, LockRecord};
pub use redis_lock::RedisDistributedLock;

/// 锁过期时间上限(100年)，超出的值按上限处理
pub const MAX_LOCK_EXPIRE_MS: u64 = 100 * 365 * 24 * 3600 * 1000;

/// 把调用方给出的过期时间收敛到 `[1, MAX_LOCK_EXPIRE_MS]`
pub(crate) fn clamp_expire_ms(expire_ms: u64) -> u64 {
    expire_ms.clamp(1, MAX_LOCK_EXPIRE_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_expire_ms() {
        assert_eq!(clamp_expire_ms(0), 1);
        assert_eq!(clamp_expire_ms(30_000), 30_000);
        assert_eq!(clamp_expire_ms(i64::MAX as u64 + 1), MAX_LOCK_EXPIRE_MS);
        assert_eq!(clamp_expire_ms(u64::MAX), MAX_LOCK_EXPIRE_MS);
    }
}

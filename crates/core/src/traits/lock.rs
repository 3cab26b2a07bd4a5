use async_trait::async_trait;

use crate::errors::BrokerResult;

/// 集群范围的互斥锁
///
/// 每个实例代表一个持有者身份。`try_lock` 不阻塞：锁空闲或已被自己持有时
/// 成功(自己持有时刷新过期时间)，否则立即返回 `Ok(false)`。
/// `Err` 只表示后端故障，锁竞争不是错误。
#[async_trait]
pub trait DistributedLock: Send + Sync {
    async fn try_lock(&self, name: &str, expire_ms: u64) -> BrokerResult<bool>;

    /// 只有当前持有者可以释放；非持有者调用返回 `Ok(false)` 且不产生影响
    async fn unlock(&self, name: &str) -> BrokerResult<bool>;

    /// 本持有者的身份标识
    fn holder(&self) -> &str;
}

//! 测试辅助函数

use std::future::Future;
use std::time::Duration;

use broker_core::AppConfig;
use tokio::time::sleep;

pub struct TestEnv;

impl TestEnv {
    /// 轮询等待条件成立，超时返回 `false`
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        condition().await
    }

    /// 退避和超时都很短、没有抖动的配置
    pub fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.dispatch.timeout_ms = 200;
        config.dispatch.base_backoff_ms = 1;
        config.dispatch.max_backoff_ms = 5;
        config.dispatch.jitter_factor = 0.0;
        config.event_bus.dispatch_timeout_ms = 10;
        config
    }
}

use std::time::Duration;

use broker_core::config::DispatchConfig;

/// 重新下发的退避配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 基础退避间隔（毫秒）
    pub base_interval_ms: u64,
    /// 最大退避间隔（毫秒）
    pub max_interval_ms: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 200,
            max_interval_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl From<&DispatchConfig> for RetryConfig {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            base_interval_ms: config.base_backoff_ms,
            max_interval_ms: config.max_backoff_ms,
            backoff_multiplier: config.backoff_multiplier,
            jitter_factor: config.jitter_factor,
        }
    }
}

impl RetryConfig {
    /// 第 `attempt` 次重新下发前的等待时间，从0开始计数
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_interval_ms as f64;
        let exponential = base * self.backoff_multiplier.powi(attempt as i32);
        let capped = exponential.min(self.max_interval_ms as f64);

        let jitter = if self.jitter_factor > 0.0 {
            capped * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0
        } else {
            0.0
        };

        let millis = (capped + jitter).max(base).max(0.0);
        Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = RetryConfig {
            base_interval_ms: 100,
            max_interval_ms: 1_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        };
        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(1), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(800));
        assert_eq!(config.backoff(10), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = RetryConfig {
            base_interval_ms: 100,
            max_interval_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        };
        for _ in 0..50 {
            let delay = config.backoff(2).as_millis();
            assert!((360..=440).contains(&delay), "抖动超出范围: {delay}");
        }
        // 抖动后不低于基础间隔
        for _ in 0..50 {
            assert!(config.backoff(0).as_millis() >= 100);
        }
    }

    #[test]
    fn test_from_dispatch_config() {
        let config = RetryConfig::from(&DispatchConfig::default());
        assert_eq!(config.base_interval_ms, 200);
        assert_eq!(config.max_interval_ms, 10_000);
    }
}

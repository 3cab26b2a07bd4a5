use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 上一个计划实例未结束时是否允许再次触发
    pub allow_concurrent_instances: bool,
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub const LOAD_BALANCE_NAMES: [&str; 7] = [
    "round_robin",
    "weighted_round_robin",
    "random",
    "least_frequently_used",
    "least_recently_used",
    "consistent_hash",
    "appoint",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub timeout_ms: u64,
    pub max_redispatch: u32,
    pub default_load_balance: String,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_redispatch: 3,
            default_load_balance: "round_robin".to_string(),
            base_backoff_ms: 200,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.timeout_ms == 0 {
            return Err(anyhow::anyhow!("下发超时时间必须大于0"));
        }
        if !LOAD_BALANCE_NAMES.contains(&self.default_load_balance.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的负载均衡策略: {}，支持的策略: {:?}",
                self.default_load_balance,
                LOAD_BALANCE_NAMES
            ));
        }
        if self.max_backoff_ms < self.base_backoff_ms {
            return Err(anyhow::anyhow!("最大退避时间不能小于基础退避时间"));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数不能小于1"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!("抖动因子必须在0到1之间"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerHealthConfig {
    pub liveness_window_seconds: u64,
    pub enable_sweep: bool,
    pub sweep_interval_seconds: u64,
}

impl Default for WorkerHealthConfig {
    fn default() -> Self {
        Self {
            liveness_window_seconds: 90,
            enable_sweep: false,
            sweep_interval_seconds: 30,
        }
    }
}

impl WorkerHealthConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.liveness_window_seconds == 0 {
            return Err(anyhow::anyhow!("Worker存活窗口必须大于0"));
        }
        if self.enable_sweep && self.sweep_interval_seconds == 0 {
            return Err(anyhow::anyhow!("清理间隔必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    pub channel_capacity: usize,
    pub dispatch_timeout_ms: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            dispatch_timeout_ms: 50,
        }
    }
}

impl EventBusConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.channel_capacity == 0 {
            return Err(anyhow::anyhow!("事件通道容量必须大于0"));
        }
        if self.dispatch_timeout_ms == 0 {
            return Err(anyhow::anyhow!("事件投递超时时间必须大于0"));
        }
        Ok(())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 每个Worker的下发统计，供LRU/LFU策略使用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbStatistics {
    pub worker_id: String,
    pub last_dispatch_at: Option<DateTime<Utc>>,
    pub dispatch_count: u64,
}

impl LbStatistics {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            last_dispatch_at: None,
            dispatch_count: 0,
        }
    }

    pub fn record(&mut self, at: DateTime<Utc>) {
        self.dispatch_count += 1;
        self.last_dispatch_at = Some(at);
    }
}

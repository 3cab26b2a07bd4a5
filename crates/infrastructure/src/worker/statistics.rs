use std::collections::HashMap;

use broker_core::SharedClock;
use broker_domain::LbStatistics;
use dashmap::DashMap;

/// 负载均衡统计，只增不减
pub struct LbStatisticsRepository {
    stats: DashMap<String, LbStatistics>,
    clock: SharedClock,
}

impl LbStatisticsRepository {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            stats: DashMap::new(),
            clock,
        }
    }

    /// 记录一次成功选择
    pub fn record_dispatch(&self, worker_id: &str) -> LbStatistics {
        let now = self.clock.now();
        let mut entry = self
            .stats
            .entry(worker_id.to_string())
            .or_insert_with(|| LbStatistics::new(worker_id));
        entry.record(now);
        entry.clone()
    }

    pub fn get(&self, worker_id: &str) -> Option<LbStatistics> {
        self.stats.get(worker_id).map(|s| s.value().clone())
    }

    /// 指定Worker的统计，没有记录的Worker返回零值
    pub fn snapshot<'a, I>(&self, worker_ids: I) -> HashMap<String, LbStatistics>
    where
        I: IntoIterator<Item = &'a str>,
    {
        worker_ids
            .into_iter()
            .map(|id| {
                let stats = self.get(id).unwrap_or_else(|| LbStatistics::new(id));
                (id.to_string(), stats)
            })
            .collect()
    }
}

//! 任务下发前的Worker筛选与选择

use std::sync::Arc;

use tracing::debug;

use broker_domain::{Job, LoadBalanceType, Worker};
use broker_infrastructure::{LbStatisticsRepository, MetricsCollector};

use crate::strategies::{
    AppointStrategy, ConsistentHashStrategy, LeastFrequentlyUsedStrategy,
    LeastRecentlyUsedStrategy, RandomStrategy, RoundRobinStrategy, SelectionContext,
    WeightedRoundRobinStrategy, WorkerSelectStrategy,
};

/// 按负载均衡类型分派到具体策略
///
/// 每次成功选择都会记入 [`LbStatisticsRepository`]。
pub struct WorkerSelector {
    round_robin: RoundRobinStrategy,
    weighted_round_robin: WeightedRoundRobinStrategy,
    random: RandomStrategy,
    least_frequently_used: LeastFrequentlyUsedStrategy,
    least_recently_used: LeastRecentlyUsedStrategy,
    consistent_hash: ConsistentHashStrategy,
    appoint: AppointStrategy,
    statistics: Arc<LbStatisticsRepository>,
    default_load_balance: LoadBalanceType,
}

impl WorkerSelector {
    pub fn new(
        statistics: Arc<LbStatisticsRepository>,
        default_load_balance: LoadBalanceType,
    ) -> Self {
        Self {
            round_robin: RoundRobinStrategy::new(),
            weighted_round_robin: WeightedRoundRobinStrategy::new(),
            random: RandomStrategy::new(),
            least_frequently_used: LeastFrequentlyUsedStrategy::new(statistics.clone()),
            least_recently_used: LeastRecentlyUsedStrategy::new(statistics.clone()),
            consistent_hash: ConsistentHashStrategy::new(),
            appoint: AppointStrategy::new(),
            statistics,
            default_load_balance,
        }
    }

    pub fn statistics(&self) -> &Arc<LbStatisticsRepository> {
        &self.statistics
    }

    /// 作业生效的负载均衡类型
    pub fn load_balance_for(&self, job: &Job) -> LoadBalanceType {
        job.dispatch_option
            .load_balance
            .unwrap_or(self.default_load_balance)
    }

    fn strategy(&self, load_balance: LoadBalanceType) -> &dyn WorkerSelectStrategy {
        match load_balance {
            LoadBalanceType::RoundRobin => &self.round_robin,
            LoadBalanceType::WeightedRoundRobin => &self.weighted_round_robin,
            LoadBalanceType::Random => &self.random,
            LoadBalanceType::LeastFrequentlyUsed => &self.least_frequently_used,
            LoadBalanceType::LeastRecentlyUsed => &self.least_recently_used,
            LoadBalanceType::ConsistentHash => &self.consistent_hash,
            LoadBalanceType::Appoint => &self.appoint,
        }
    }

    /// 从候选中选出一个Worker并记录统计
    pub fn select(
        &self,
        load_balance: LoadBalanceType,
        candidates: &[Worker],
        ctx: &SelectionContext<'_>,
    ) -> Option<Worker> {
        if candidates.is_empty() {
            MetricsCollector::record_selection_miss(load_balance.as_str());
            return None;
        }
        let selected = self.strategy(load_balance).select(candidates, ctx).cloned();
        match &selected {
            Some(worker) => {
                self.statistics.record_dispatch(&worker.id);
            }
            None => MetricsCollector::record_selection_miss(load_balance.as_str()),
        }
        selected
    }

    /// 按执行器、标签和资源需求筛选候选Worker
    pub fn filter_candidates(job: &Job, workers: Vec<Worker>) -> Vec<Worker> {
        let option = &job.dispatch_option;
        let executor = &job.executor_option.name;
        let total = workers.len();

        let candidates: Vec<Worker> = workers
            .into_iter()
            .filter(|w| w.supports(executor))
            .filter(|w| option.tag_filters.iter().all(|f| f.matches(&w.tags)))
            .filter(|w| {
                option
                    .cpu_requirement
                    .map(|cpu| w.metric.cpu_available >= cpu)
                    .unwrap_or(true)
            })
            .filter(|w| {
                option
                    .ram_requirement
                    .map(|ram| w.metric.ram_available_gb >= ram)
                    .unwrap_or(true)
            })
            .filter(|w| w.metric.queue_remaining > 0)
            .collect();

        debug!(
            "作业 {} 的候选Worker: {}/{} (执行器: {})",
            job.id,
            candidates.len(),
            total,
            executor
        );
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_core::ManualClock;
    use broker_domain::{
        DispatchOption, ExecuteType, ExecutorOption, TagCondition, TagFilter, WorkerMetric,
    };
    use chrono::Utc;
    use std::collections::HashMap;

    fn worker(id: &str, executor: &str, queue: u32) -> Worker {
        let now = Utc::now();
        Worker {
            id: id.to_string(),
            protocol: "http".to_string(),
            host: "127.0.0.1".to_string(),
            port: 9000,
            executors: HashMap::from([(executor.to_string(), ExecuteType::Function)]),
            tags: HashMap::new(),
            weight: 1,
            metric: WorkerMetric {
                cpu_available: 4.0,
                ram_available_gb: 8.0,
                queue_remaining: queue,
                executing_task_ids: Vec::new(),
            },
            registered_at: now,
            last_heartbeat: now,
        }
    }

    fn selector() -> WorkerSelector {
        let stats = Arc::new(LbStatisticsRepository::new(Arc::new(ManualClock::default())));
        WorkerSelector::new(stats, LoadBalanceType::RoundRobin)
    }

    fn ctx() -> SelectionContext<'static> {
        SelectionContext {
            cursor_key: "j",
            dispatch_key: "j",
            appoint_worker_id: None,
        }
    }

    #[test]
    fn test_filter_by_executor_queue_and_resources() {
        let mut job = Job::new("j", ExecutorOption::new("echo", ExecuteType::Function));
        job.dispatch_option.cpu_requirement = Some(2.0);

        let mut weak = worker("weak", "echo", 5);
        weak.metric.cpu_available = 1.0;
        let workers = vec![
            worker("ok", "echo", 5),
            worker("full", "echo", 0),
            worker("other", "sleep", 5),
            weak,
        ];
        let candidates = WorkerSelector::filter_candidates(&job, workers);
        let ids: Vec<&str> = candidates.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["ok"]);
    }

    #[test]
    fn test_filter_by_tags() {
        let job = Job::new("j", ExecutorOption::new("echo", ExecuteType::Function))
            .with_dispatch_option(DispatchOption {
                tag_filters: vec![TagFilter {
                    key: "region".to_string(),
                    condition: TagCondition::MustMatchValue,
                    value: Some("eu".to_string()),
                }],
                ..Default::default()
            });
        let mut eu = worker("eu", "echo", 1);
        eu.tags.insert("region".to_string(), vec!["eu".to_string()]);
        let us = worker("us", "echo", 1);

        let candidates = WorkerSelector::filter_candidates(&job, vec![eu, us]);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, "eu");
    }

    #[test]
    fn test_select_records_statistics() {
        let selector = selector();
        let workers = vec![worker("a", "echo", 1), worker("b", "echo", 1)];
        let selected = selector
            .select(LoadBalanceType::RoundRobin, &workers, &ctx())
            .unwrap();
        assert_eq!(selected.id, "a");
        assert_eq!(selector.statistics().get("a").unwrap().dispatch_count, 1);
        assert!(selector.statistics().get("b").is_none());
    }

    #[test]
    fn test_empty_candidates_select_nothing() {
        let selector = selector();
        for lb in [
            LoadBalanceType::RoundRobin,
            LoadBalanceType::WeightedRoundRobin,
            LoadBalanceType::Random,
            LoadBalanceType::LeastFrequentlyUsed,
            LoadBalanceType::LeastRecentlyUsed,
            LoadBalanceType::ConsistentHash,
            LoadBalanceType::Appoint,
        ] {
            assert!(selector.select(lb, &[], &ctx()).is_none());
        }
    }

    #[test]
    fn test_default_load_balance_applies() {
        let selector = selector();
        let job = Job::new("j", ExecutorOption::new("echo", ExecuteType::Function));
        assert_eq!(selector.load_balance_for(&job), LoadBalanceType::RoundRobin);
        let job = job.with_dispatch_option(DispatchOption {
            load_balance: Some(LoadBalanceType::Random),
            ..Default::default()
        });
        assert_eq!(selector.load_balance_for(&job), LoadBalanceType::Random);
    }
}

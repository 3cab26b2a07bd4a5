//! Broker指标
//!
//! 通过 `metrics` 门面记录，导出器由宿主进程安装。

use async_trait::async_trait;
use broker_domain::{DispatchOutcome, Event, EventTopic};
use metrics::{counter, gauge};

use crate::event_bus::EventSubscriber;

/// 下发相关指标
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn record_dispatch(strategy: &str, outcome: &DispatchOutcome) {
        let result = match outcome {
            DispatchOutcome::Accepted => "accepted",
            DispatchOutcome::Refused { .. } => "refused",
            DispatchOutcome::Unreachable { .. } => "unreachable",
        };
        counter!("broker_dispatch_total", "strategy" => strategy.to_string(), "result" => result)
            .increment(1);
    }

    pub fn record_selection_miss(strategy: &str) {
        counter!("broker_selection_miss_total", "strategy" => strategy.to_string()).increment(1);
    }

    pub fn record_redispatch_exhausted() {
        counter!("broker_redispatch_exhausted_total").increment(1);
    }

    pub fn set_available_workers(count: usize) {
        gauge!("broker_available_workers").set(count as f64);
    }
}

/// 按主题统计生命周期事件的订阅者
#[derive(Default)]
pub struct MetricsSubscriber;

impl MetricsSubscriber {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventSubscriber for MetricsSubscriber {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn on_event(&self, event: &Event) {
        counter!("broker_events_total", "topic" => event.topic.as_str()).increment(1);
        match event.topic {
            EventTopic::PlanInstanceSucceeded | EventTopic::PlanInstanceFailed => {
                gauge!("broker_running_plan_instances").decrement(1.0);
            }
            EventTopic::PlanInstanceCreated => {
                gauge!("broker_running_plan_instances").increment(1.0);
            }
            _ => {}
        }
    }
}

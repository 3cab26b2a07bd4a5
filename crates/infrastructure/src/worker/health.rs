use std::sync::Arc;
use std::time::Duration;

use broker_core::{BrokerResult, SharedClock};
use broker_domain::{Event, EventSource, EventTopic, WorkerHeartbeat};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::registry::WorkerRegistry;
use crate::event_bus::EventBus;

/// Worker健康跟踪
///
/// 处理心跳上报，可选地在后台定期移除过期Worker。
pub struct WorkerHealthTracker {
    registry: Arc<WorkerRegistry>,
    event_bus: Arc<EventBus>,
    clock: SharedClock,
    running: Arc<RwLock<bool>>,
}

impl WorkerHealthTracker {
    pub fn new(registry: Arc<WorkerRegistry>, event_bus: Arc<EventBus>, clock: SharedClock) -> Self {
        Self {
            registry,
            event_bus,
            clock,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn ingest_heartbeat(&self, heartbeat: WorkerHeartbeat) -> BrokerResult<()> {
        debug!(
            worker_id = %heartbeat.worker_id,
            queue_remaining = heartbeat.metric.queue_remaining,
            "收到Worker心跳"
        );
        self.registry
            .heartbeat(&heartbeat.worker_id, heartbeat.metric)
    }

    /// 执行一次过期清理
    pub async fn sweep_once(&self) -> Vec<String> {
        let expired = self.registry.remove_expired();
        for worker_id in &expired {
            info!("Worker {} 心跳超时，已移除", worker_id);
            self.event_bus
                .publish(Event::new(
                    EventTopic::WorkerExpired,
                    EventSource::worker(worker_id.clone()),
                    self.clock.now(),
                ))
                .await;
        }
        expired
    }

    /// 启动后台清理循环
    pub async fn start_sweep(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        *self.running.write().await = true;
        let tracker = Arc::clone(self);
        info!("启动Worker过期清理循环，间隔 {:?}", interval);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !*tracker.running.read().await {
                    info!("收到停止信号，退出Worker过期清理循环");
                    break;
                }
                tracker.sweep_once().await;
            }
        })
    }

    pub async fn stop_sweep(&self) {
        *self.running.write().await = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventSubscriber;
    use async_trait::async_trait;
    use broker_core::config::EventBusConfig;
    use broker_core::ManualClock;
    use broker_domain::{WorkerMetric, WorkerRegistration};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct ExpiredRecorder(Mutex<Vec<String>>);

    #[async_trait]
    impl EventSubscriber for ExpiredRecorder {
        fn name(&self) -> &str {
            "expired-recorder"
        }

        fn accepts(&self, topic: EventTopic) -> bool {
            topic == EventTopic::WorkerExpired
        }

        async fn on_event(&self, event: &Event) {
            self.0.lock().unwrap().push(event.source.id.clone());
        }
    }

    fn registration(port: u16) -> WorkerRegistration {
        WorkerRegistration {
            protocol: "http".to_string(),
            host: "127.0.0.1".to_string(),
            port,
            executors: HashMap::new(),
            tags: HashMap::new(),
            weight: None,
            metric: None,
        }
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_worker_alive_and_sweep_publishes_expiry() {
        let clock = ManualClock::new(Utc::now());
        let shared: SharedClock = Arc::new(clock.clone());
        let registry = Arc::new(WorkerRegistry::new(
            shared.clone(),
            chrono::Duration::seconds(10),
            vec![],
        ));
        let bus = Arc::new(EventBus::new(&EventBusConfig::default()));
        let recorder = Arc::new(ExpiredRecorder(Mutex::new(Vec::new())));
        bus.subscribe(recorder.clone());
        let tracker = WorkerHealthTracker::new(registry.clone(), bus, shared);

        let alive = registry.register(&registration(9000)).worker_id;
        let stale = registry.register(&registration(9001)).worker_id;

        clock.advance(chrono::Duration::seconds(8));
        tracker
            .ingest_heartbeat(WorkerHeartbeat {
                worker_id: alive.clone(),
                metric: WorkerMetric {
                    cpu_available: 1.0,
                    ram_available_gb: 1.0,
                    queue_remaining: 1,
                    executing_task_ids: vec!["t-1".to_string()],
                },
            })
            .unwrap();
        clock.advance(chrono::Duration::seconds(8));

        assert_eq!(tracker.sweep_once().await, vec![stale.clone()]);
        assert_eq!(
            registry.get(&alive).unwrap().metric.executing_task_ids,
            vec!["t-1".to_string()]
        );

        for _ in 0..50 {
            if !recorder.0.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*recorder.0.lock().unwrap(), vec![stale]);
    }

    #[tokio::test]
    async fn test_sweep_loop_stops() {
        let clock: SharedClock = Arc::new(ManualClock::new(Utc::now()));
        let registry = Arc::new(WorkerRegistry::new(
            clock.clone(),
            chrono::Duration::seconds(10),
            vec![],
        ));
        let bus = Arc::new(EventBus::new(&EventBusConfig::default()));
        let tracker = Arc::new(WorkerHealthTracker::new(registry, bus, clock));

        let handle = tracker.start_sweep(Duration::from_millis(10)).await;
        tracker.stop_sweep().await;
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

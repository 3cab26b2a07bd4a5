//! 进程内事件总线
//!
//! 每个订阅者拥有独立的有界通道和消费任务。发布方最多等待
//! `dispatch_timeout`，通道满时转交后台任务继续投递，事件不会丢失。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker_core::config::EventBusConfig;
use broker_domain::{Event, EventTopic};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 事件订阅者
///
/// `on_event` 在订阅者自己的任务中顺序执行，耗时工作需要自行转交。
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    fn name(&self) -> &str;

    fn accepts(&self, _topic: EventTopic) -> bool {
        true
    }

    async fn on_event(&self, event: &Event);
}

struct Subscription {
    subscriber: Arc<dyn EventSubscriber>,
    sender: mpsc::Sender<Event>,
}

pub struct EventBus {
    subscriptions: DashMap<String, Subscription>,
    channel_capacity: usize,
    dispatch_timeout: Duration,
}

impl EventBus {
    pub fn new(config: &EventBusConfig) -> Self {
        Self {
            subscriptions: DashMap::new(),
            channel_capacity: config.channel_capacity,
            dispatch_timeout: Duration::from_millis(config.dispatch_timeout_ms),
        }
    }

    /// 注册订阅者并启动其消费任务；同名订阅者会被替换
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) -> JoinHandle<()> {
        let (sender, mut receiver) = mpsc::channel::<Event>(self.channel_capacity);
        let name = subscriber.name().to_string();
        self.subscriptions.insert(
            name.clone(),
            Subscription {
                subscriber: subscriber.clone(),
                sender,
            },
        );
        debug!("事件订阅者 {} 已注册", name);

        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                subscriber.on_event(&event).await;
            }
            debug!("事件订阅者 {} 的通道已关闭", name);
        })
    }

    pub fn unsubscribe(&self, name: &str) -> bool {
        self.subscriptions.remove(name).is_some()
    }

    pub async fn publish(&self, event: Event) {
        let targets: Vec<(String, mpsc::Sender<Event>)> = self
            .subscriptions
            .iter()
            .filter(|s| s.subscriber.accepts(event.topic))
            .map(|s| (s.key().clone(), s.sender.clone()))
            .collect();

        for (name, sender) in targets {
            let reserved =
                tokio::time::timeout(self.dispatch_timeout, sender.clone().reserve_owned()).await;
            match reserved {
                Ok(Ok(permit)) => {
                    permit.send(event.clone());
                }
                Ok(Err(_)) => {
                    warn!("事件订阅者 {} 已关闭，移除订阅", name);
                    self.subscriptions.remove(&name);
                }
                Err(_) => {
                    warn!(
                        "事件订阅者 {} 处理过慢，事件 {} 转入后台投递",
                        name,
                        event.topic.as_str()
                    );
                    let event = event.clone();
                    tokio::spawn(async move {
                        if sender.send(event).await.is_err() {
                            warn!("事件订阅者 {} 在后台投递前已关闭", name);
                        }
                    });
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_domain::EventSource;
    use chrono::Utc;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    struct Recorder {
        name: String,
        only: Option<EventTopic>,
        seen: Mutex<Vec<EventTopic>>,
        gate: Option<Arc<Notify>>,
    }

    impl Recorder {
        fn new(name: &str, only: Option<EventTopic>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                only,
                seen: Mutex::new(Vec::new()),
                gate: None,
            })
        }

        fn seen(&self) -> Vec<EventTopic> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventSubscriber for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn accepts(&self, topic: EventTopic) -> bool {
            self.only.map_or(true, |t| t == topic)
        }

        async fn on_event(&self, event: &Event) {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.seen.lock().unwrap().push(event.topic);
        }
    }

    fn event(topic: EventTopic) -> Event {
        Event::new(topic, EventSource::task("t-1"), Utc::now())
    }

    async fn wait_for(recorder: &Recorder, count: usize) {
        for _ in 0..100 {
            if recorder.seen().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_subscribers_filter_by_topic() {
        let bus = EventBus::new(&EventBusConfig::default());
        let all = Recorder::new("all", None);
        let refused = Recorder::new("refused", Some(EventTopic::TaskRefused));
        bus.subscribe(all.clone());
        bus.subscribe(refused.clone());

        bus.publish(event(EventTopic::TaskDispatched)).await;
        bus.publish(event(EventTopic::TaskRefused)).await;

        wait_for(&all, 2).await;
        wait_for(&refused, 1).await;
        assert_eq!(all.seen(), vec![EventTopic::TaskDispatched, EventTopic::TaskRefused]);
        assert_eq!(refused.seen(), vec![EventTopic::TaskRefused]);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block_publisher_or_lose_events() {
        let bus = EventBus::new(&EventBusConfig {
            channel_capacity: 1,
            dispatch_timeout_ms: 20,
        });
        let gate = Arc::new(Notify::new());
        let slow = Arc::new(Recorder {
            name: "slow".to_string(),
            only: None,
            seen: Mutex::new(Vec::new()),
            gate: Some(gate.clone()),
        });
        bus.subscribe(slow.clone());

        let started = std::time::Instant::now();
        for _ in 0..4 {
            bus.publish(event(EventTopic::TaskCreated)).await;
        }
        // 每次发布最多等待一个投递超时
        assert!(started.elapsed() < Duration::from_millis(500));

        for _ in 0..4 {
            gate.notify_one();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        wait_for(&slow, 4).await;
        assert_eq!(slow.seen().len(), 4);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::new(&EventBusConfig::default());
        bus.subscribe(Recorder::new("a", None));
        assert_eq!(bus.subscriber_count(), 1);
        assert!(bus.unsubscribe("a"));
        assert!(!bus.unsubscribe("a"));
    }
}

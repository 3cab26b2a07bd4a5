//! 测试替身

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use broker_domain::{DispatchOutcome, Event, EventTopic, TaskDispatchRequest, Worker, WorkerClient};
use broker_infrastructure::EventSubscriber;

/// 一次下发记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub worker_id: String,
    pub task_id: String,
    pub job_id: String,
}

/// 按Worker预设应答的下发客户端
///
/// 没有预设应答时接收任务。
#[derive(Clone, Default)]
pub struct ScriptedWorkerClient {
    scripts: Arc<Mutex<HashMap<String, VecDeque<DispatchOutcome>>>>,
    always: Arc<Mutex<HashMap<String, DispatchOutcome>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl ScriptedWorkerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依次返回的应答，用完后回到默认行为
    pub fn script(&self, worker_id: &str, outcomes: Vec<DispatchOutcome>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(worker_id.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// 该Worker总是返回同一应答
    pub fn always(&self, worker_id: &str, outcome: DispatchOutcome) {
        self.always
            .lock()
            .unwrap()
            .insert(worker_id.to_string(), outcome);
    }

    /// 下发前等待，用于模拟超时
    pub fn delay(&self, worker_id: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(worker_id.to_string(), delay);
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn deliveries_to(&self, worker_id: &str) -> usize {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.worker_id == worker_id)
            .count()
    }

    pub fn refused(reason: &str) -> DispatchOutcome {
        DispatchOutcome::Refused {
            reason: reason.to_string(),
        }
    }

    pub fn unreachable(reason: &str) -> DispatchOutcome {
        DispatchOutcome::Unreachable {
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl WorkerClient for ScriptedWorkerClient {
    async fn deliver(&self, worker: &Worker, request: &TaskDispatchRequest) -> DispatchOutcome {
        self.deliveries.lock().unwrap().push(Delivery {
            worker_id: worker.id.clone(),
            task_id: request.task_id.clone(),
            job_id: request.job_id.clone(),
        });

        let delay = self.delays.lock().unwrap().get(&worker.id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&worker.id)
            .and_then(|queue| queue.pop_front());
        if let Some(outcome) = scripted {
            return outcome;
        }
        self.always
            .lock()
            .unwrap()
            .get(&worker.id)
            .cloned()
            .unwrap_or(DispatchOutcome::Accepted)
    }
}

/// 记录收到的全部事件
#[derive(Clone)]
pub struct RecordingSubscriber {
    name: String,
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingSubscriber {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn topics(&self) -> Vec<EventTopic> {
        self.events.lock().unwrap().iter().map(|e| e.topic).collect()
    }

    pub fn count(&self, topic: EventTopic) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.topic == topic)
            .count()
    }

    /// 指定来源的事件主题，按到达顺序
    pub fn topics_for(&self, source_id: &str) -> Vec<EventTopic> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.source.id == source_id)
            .map(|e| e.topic)
            .collect()
    }
}

#[async_trait]
impl EventSubscriber for RecordingSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

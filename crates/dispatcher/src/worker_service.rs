use std::sync::Arc;

use serde_json::json;

use broker_core::{BrokerResult, SharedClock};
use broker_domain::{
    Event, EventSource, EventTopic, Worker, WorkerHeartbeat, WorkerRegistration,
    WorkerRegistrationResponse,
};
use broker_infrastructure::{EventBus, WorkerHealthTracker, WorkerRegistry};

/// Worker接入：注册、注销和心跳
pub struct WorkerService {
    registry: Arc<WorkerRegistry>,
    tracker: Arc<WorkerHealthTracker>,
    event_bus: Arc<EventBus>,
    clock: SharedClock,
}

impl WorkerService {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        tracker: Arc<WorkerHealthTracker>,
        event_bus: Arc<EventBus>,
        clock: SharedClock,
    ) -> Self {
        Self {
            registry,
            tracker,
            event_bus,
            clock,
        }
    }

    pub async fn register(
        &self,
        registration: &WorkerRegistration,
    ) -> BrokerResult<WorkerRegistrationResponse> {
        if registration.host.trim().is_empty() {
            return Err(broker_core::BrokerError::Validation(
                "Worker地址不能为空".to_string(),
            ));
        }
        let response = self.registry.register(registration);
        let executors: Vec<&String> = registration.executors.keys().collect();
        self.publish(
            EventTopic::WorkerRegistered,
            &response.worker_id,
            json!({
                "host": registration.host,
                "port": registration.port,
                "executors": executors,
            }),
        )
        .await;
        Ok(response)
    }

    pub async fn unregister(&self, worker_id: &str) -> bool {
        let removed = self.registry.unregister(worker_id);
        if removed {
            self.publish(EventTopic::WorkerUnregistered, worker_id, json!({}))
                .await;
        }
        removed
    }

    pub fn heartbeat(&self, heartbeat: WorkerHeartbeat) -> BrokerResult<()> {
        self.tracker.ingest_heartbeat(heartbeat)
    }

    pub fn available_workers(&self) -> Vec<Worker> {
        self.registry.available_workers()
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    async fn publish(&self, topic: EventTopic, worker_id: &str, payload: serde_json::Value) {
        let event = Event::new(topic, EventSource::worker(worker_id), self.clock.now())
            .with_payload(payload);
        self.event_bus.publish(event).await;
    }
}

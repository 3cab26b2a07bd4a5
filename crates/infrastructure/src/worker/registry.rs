use broker_core::{BrokerError, BrokerResult, SharedClock};
use broker_domain::{Worker, WorkerMetric, WorkerRegistration, WorkerRegistrationResponse};
use chrono::Duration;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Worker目录
///
/// 存活判断是惰性的：读取时用最近一次心跳和存活窗口比较。
pub struct WorkerRegistry {
    workers: DashMap<String, Worker>,
    clock: SharedClock,
    liveness_window: Duration,
    brokers: Vec<String>,
}

impl WorkerRegistry {
    /// `brokers` 是注册响应中返回给Worker的Broker拓扑
    pub fn new(clock: SharedClock, liveness_window: Duration, brokers: Vec<String>) -> Self {
        Self {
            workers: DashMap::new(),
            clock,
            liveness_window,
            brokers,
        }
    }

    /// 注册Worker；同一地址重复注册会替换执行器、标签和权重
    pub fn register(&self, registration: &WorkerRegistration) -> WorkerRegistrationResponse {
        let now = self.clock.now();
        let incoming = Worker::from_registration(registration, now);
        let worker_id = incoming.id.clone();

        match self.workers.entry(worker_id.clone()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                existing.executors = incoming.executors;
                existing.tags = incoming.tags;
                existing.weight = incoming.weight;
                if registration.metric.is_some() {
                    existing.metric = incoming.metric;
                }
                existing.last_heartbeat = now;
                debug!("Worker {} 重新注册", worker_id);
            }
            Entry::Vacant(entry) => {
                info!("Worker {} 注册成功: {}", worker_id, incoming.address());
                entry.insert(incoming);
            }
        }

        WorkerRegistrationResponse {
            worker_id,
            session_token: Uuid::new_v4().to_string(),
            brokers: self.brokers.clone(),
        }
    }

    pub fn unregister(&self, worker_id: &str) -> bool {
        let removed = self.workers.remove(worker_id).is_some();
        if removed {
            info!("Worker {} 已注销", worker_id);
        }
        removed
    }

    pub fn get(&self, worker_id: &str) -> Option<Worker> {
        self.workers.get(worker_id).map(|w| w.value().clone())
    }

    /// 存活窗口内的Worker，按ID排序
    pub fn available_workers(&self) -> Vec<Worker> {
        let now = self.clock.now();
        let mut workers: Vec<Worker> = self
            .workers
            .iter()
            .filter(|w| w.is_alive(now, self.liveness_window))
            .map(|w| w.value().clone())
            .collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    /// 记录心跳并刷新存活时间
    pub fn heartbeat(&self, worker_id: &str, metric: WorkerMetric) -> BrokerResult<()> {
        let now = self.clock.now();
        let mut worker = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| BrokerError::WorkerNotFound {
                id: worker_id.to_string(),
            })?;
        worker.metric = metric;
        worker.last_heartbeat = now;
        Ok(())
    }

    /// 移除心跳已超出存活窗口的Worker，返回被移除的ID
    pub fn remove_expired(&self) -> Vec<String> {
        let now = self.clock.now();
        let expired: Vec<String> = self
            .workers
            .iter()
            .filter(|w| !w.is_alive(now, self.liveness_window))
            .map(|w| w.key().clone())
            .collect();

        expired
            .into_iter()
            .filter(|id| {
                self.workers
                    .remove_if(id, |_, w| !w.is_alive(now, self.liveness_window))
                    .is_some()
            })
            .collect()
    }

    pub fn brokers(&self) -> &[String] {
        &self.brokers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::job::ExecuteType;

/// Worker上报的资源快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerMetric {
    /// 可用CPU核数
    pub cpu_available: f64,
    /// 可用内存(GB)
    pub ram_available_gb: f64,
    /// 剩余队列容量
    pub queue_remaining: u32,
    pub executing_task_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    /// 执行器名称 -> 执行方式
    pub executors: HashMap<String, ExecuteType>,
    pub tags: HashMap<String, Vec<String>>,
    /// 加权轮询使用的权重
    pub weight: u32,
    pub metric: WorkerMetric,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl Worker {
    /// 由 protocol/host/port 推导出的稳定ID，重复注册得到同一个ID
    pub fn derive_id(protocol: &str, host: &str, port: u16) -> String {
        let digest = Sha256::digest(format!("{protocol}://{host}:{port}").as_bytes());
        digest[..16].iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn from_registration(registration: &WorkerRegistration, now: DateTime<Utc>) -> Self {
        Self {
            id: Self::derive_id(&registration.protocol, &registration.host, registration.port),
            protocol: registration.protocol.clone(),
            host: registration.host.clone(),
            port: registration.port,
            executors: registration.executors.clone(),
            tags: registration.tags.clone(),
            weight: registration.weight.unwrap_or(1).max(1),
            metric: registration.metric.clone().unwrap_or_default(),
            registered_at: now,
            last_heartbeat: now,
        }
    }

    pub fn address(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    pub fn supports(&self, executor: &str) -> bool {
        self.executors.contains_key(executor)
    }

    pub fn is_alive(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.last_heartbeat <= window
    }
}

/// Worker注册请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub executors: HashMap<String, ExecuteType>,
    #[serde(default)]
    pub tags: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub weight: Option<u32>,
    #[serde(default)]
    pub metric: Option<WorkerMetric>,
}

/// Worker注册响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRegistrationResponse {
    pub worker_id: String,
    pub session_token: String,
    /// 当前Broker拓扑，单节点模式下只有一个地址
    pub brokers: Vec<String>,
}

/// Worker心跳
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub metric: WorkerMetric,
}

use serde::{Deserialize, Serialize};

/// 当前Broker节点的描述
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerNodeConfig {
    pub host: String,
    pub port: u16,
    pub protocol: String, // "http" | "https"
}

impl Default for BrokerNodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8500,
            protocol: "http".to_string(),
        }
    }
}

impl BrokerNodeConfig {
    pub fn address(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            return Err(anyhow::anyhow!("Broker主机名不能为空"));
        }
        if self.port == 0 {
            return Err(anyhow::anyhow!("Broker端口必须大于0"));
        }
        let valid_protocols = ["http", "https"];
        if !valid_protocols.contains(&self.protocol.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的协议: {}，支持的协议: {:?}",
                self.protocol,
                valid_protocols
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMode {
    /// 单节点，所有实体都由本节点调度
    Standalone,
    /// 多节点，通过分布式锁决定实体的调度归属
    Cluster,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub mode: ClusterMode,
    pub peers: Vec<String>, // 其它Broker地址，用于注册响应中的拓扑
    pub lock_backend: LockBackend,
    pub redis_url: String,
    pub lock_expire_ms: u64,
    pub lock_key_prefix: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            mode: ClusterMode::Standalone,
            peers: Vec::new(),
            lock_backend: LockBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            lock_expire_ms: 30_000,
            lock_key_prefix: "broker:lock:".to_string(),
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lock_expire_ms == 0 {
            return Err(anyhow::anyhow!("锁过期时间必须大于0"));
        }
        if self.lock_backend == LockBackend::Redis && !self.redis_url.starts_with("redis") {
            return Err(anyhow::anyhow!("Redis URL格式无效: {}", self.redis_url));
        }
        if self.mode == ClusterMode::Cluster && self.lock_backend == LockBackend::Memory {
            tracing::warn!("集群模式下使用内存锁，只能在单进程内保证互斥");
        }
        Ok(())
    }
}

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use broker_core::BrokerError;
use serde::{Deserialize, Serialize};

/// 执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteType {
    Function,
    Shell,
    Http,
}

/// 执行器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorOption {
    /// 逻辑执行器名称，Worker按名称声明支持的执行器
    pub name: String,
    pub execute_type: ExecuteType,
}

impl ExecutorOption {
    pub fn new(name: impl Into<String>, execute_type: ExecuteType) -> Self {
        Self {
            name: name.into(),
            execute_type,
        }
    }
}

/// 负载均衡策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceType {
    RoundRobin,
    WeightedRoundRobin,
    Random,
    LeastFrequentlyUsed,
    LeastRecentlyUsed,
    ConsistentHash,
    Appoint,
}

impl LoadBalanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalanceType::RoundRobin => "round_robin",
            LoadBalanceType::WeightedRoundRobin => "weighted_round_robin",
            LoadBalanceType::Random => "random",
            LoadBalanceType::LeastFrequentlyUsed => "least_frequently_used",
            LoadBalanceType::LeastRecentlyUsed => "least_recently_used",
            LoadBalanceType::ConsistentHash => "consistent_hash",
            LoadBalanceType::Appoint => "appoint",
        }
    }
}

impl fmt::Display for LoadBalanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadBalanceType {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(LoadBalanceType::RoundRobin),
            "weighted_round_robin" => Ok(LoadBalanceType::WeightedRoundRobin),
            "random" => Ok(LoadBalanceType::Random),
            "least_frequently_used" => Ok(LoadBalanceType::LeastFrequentlyUsed),
            "least_recently_used" => Ok(LoadBalanceType::LeastRecentlyUsed),
            "consistent_hash" => Ok(LoadBalanceType::ConsistentHash),
            "appoint" => Ok(LoadBalanceType::Appoint),
            other => Err(BrokerError::Validation(format!(
                "未知的负载均衡策略: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagCondition {
    Exists,
    NotExists,
    MustMatchValue,
    MustNotMatchValue,
}

/// 标签过滤条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagFilter {
    pub key: String,
    pub condition: TagCondition,
    #[serde(default)]
    pub value: Option<String>,
}

impl TagFilter {
    pub fn matches(&self, tags: &HashMap<String, Vec<String>>) -> bool {
        let values = tags.get(&self.key);
        let has_value = |v: &str| values.map(|vs| vs.iter().any(|x| x == v)).unwrap_or(false);
        match self.condition {
            TagCondition::Exists => values.is_some(),
            TagCondition::NotExists => values.is_none(),
            TagCondition::MustMatchValue => self.value.as_deref().map(has_value).unwrap_or(false),
            TagCondition::MustNotMatchValue => {
                !self.value.as_deref().map(has_value).unwrap_or(false)
            }
        }
    }
}

/// 下发配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchOption {
    /// 未设置时使用全局默认策略
    pub load_balance: Option<LoadBalanceType>,
    pub appoint_worker_id: Option<String>,
    /// 每个作业实例拆分的任务数
    pub shard_count: u32,
    pub tag_filters: Vec<TagFilter>,
    pub cpu_requirement: Option<f64>,
    pub ram_requirement: Option<f64>,
}

impl Default for DispatchOption {
    fn default() -> Self {
        Self {
            load_balance: None,
            appoint_worker_id: None,
            shard_count: 1,
            tag_filters: Vec::new(),
            cpu_requirement: None,
            ram_requirement: None,
        }
    }
}

/// 作业定义，计划DAG中的一个节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// 子作业ID
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub dispatch_option: DispatchOption,
    pub executor_option: ExecutorOption,
    /// 作业实例执行失败后的重试次数
    #[serde(default)]
    pub retry: u32,
    /// 失败处理器名称，未设置时使用 `terminate`
    #[serde(default)]
    pub fail_handler: Option<String>,
}

impl Job {
    pub fn new(id: impl Into<String>, executor_option: ExecutorOption) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            children: Vec::new(),
            dispatch_option: DispatchOption::default(),
            executor_option,
            retry: 0,
            fail_handler: None,
        }
    }

    pub fn with_children<I, S>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.children = children.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dispatch_option(mut self, option: DispatchOption) -> Self {
        self.dispatch_option = option;
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_fail_handler(mut self, name: impl Into<String>) -> Self {
        self.fail_handler = Some(name.into());
        self
    }
}

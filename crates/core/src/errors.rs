use thiserror::Error;

/// Broker错误类型定义
///
/// 只承载真正的故障；锁竞争、Worker拒绝等预期分支通过返回值表达。
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("校验失败: {0}")]
    Validation(String),

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("计划未找到: {id}")]
    PlanNotFound { id: String },

    #[error("计划版本未找到: {plan_id}@{version}")]
    PlanVersionNotFound { plan_id: String, version: u32 },

    #[error("作业未找到: {id}")]
    JobNotFound { id: String },

    #[error("作业实例未找到: {id}")]
    JobInstanceNotFound { id: String },

    #[error("计划实例未找到: {id}")]
    PlanInstanceNotFound { id: String },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },

    #[error("非法的状态变更: {entity} {id} {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    #[error("任务 {id} 已达到最大重新下发次数 {max}")]
    RedispatchExhausted { id: String, max: u32 },

    #[error("分布式锁错误: {0}")]
    Lock(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl BrokerError {
    /// 稳定的错误码，供外部API层映射
    pub fn code(&self) -> &'static str {
        match self {
            BrokerError::Validation(_) => "VALIDATION",
            BrokerError::InvalidCron { .. } => "INVALID_CRON",
            BrokerError::PlanNotFound { .. } => "PLAN_NOT_FOUND",
            BrokerError::PlanVersionNotFound { .. } => "PLAN_VERSION_NOT_FOUND",
            BrokerError::JobNotFound { .. } => "JOB_NOT_FOUND",
            BrokerError::JobInstanceNotFound { .. } => "JOB_INSTANCE_NOT_FOUND",
            BrokerError::PlanInstanceNotFound { .. } => "PLAN_INSTANCE_NOT_FOUND",
            BrokerError::TaskNotFound { .. } => "TASK_NOT_FOUND",
            BrokerError::WorkerNotFound { .. } => "WORKER_NOT_FOUND",
            BrokerError::InvalidTransition { .. } => "INVALID_TRANSITION",
            BrokerError::RedispatchExhausted { .. } => "REDISPATCH_EXHAUSTED",
            BrokerError::Lock(_) => "LOCK",
            BrokerError::Network(_) => "NETWORK",
            BrokerError::Serialization(_) => "SERIALIZATION",
            BrokerError::Configuration(_) => "CONFIGURATION",
            BrokerError::Internal(_) => "INTERNAL",
        }
    }

    /// 是否是可以通过重试恢复的故障
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Network(_) | BrokerError::Lock(_))
    }

    pub fn invalid_transition(
        entity: &'static str,
        id: impl Into<String>,
        from: impl std::fmt::Debug,
        to: impl std::fmt::Debug,
    ) -> Self {
        BrokerError::InvalidTransition {
            entity,
            id: id.into(),
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        BrokerError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

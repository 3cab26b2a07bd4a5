use async_trait::async_trait;

use crate::models::{TaskDispatchRequest, Worker};

/// 一次下发的结果
///
/// 拒绝和不可达都是预期分支，分开表达便于区分容量压力和网络故障。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Accepted,
    /// Worker明确拒绝，例如队列已满
    Refused { reason: String },
    /// 超时或网络错误，Worker是否收到未知
    Unreachable { reason: String },
}

impl DispatchOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, DispatchOutcome::Accepted)
    }
}

/// Broker到Worker的下发通道
#[async_trait]
pub trait WorkerClient: Send + Sync {
    async fn deliver(&self, worker: &Worker, request: &TaskDispatchRequest) -> DispatchOutcome;
}

//! 作业失败处理
//!
//! 失败处理器决定一次失败之后计划实例是否终止。内置 `terminate` 和 `ignore`，
//! 作业通过 `fail_handler` 字段按名称引用，未指定时使用 `terminate`。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{info, warn};

use broker_core::{BrokerError, BrokerResult};

pub const TERMINATE_HANDLER: &str = "terminate";
pub const IGNORE_HANDLER: &str = "ignore";

/// 失败类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Worker拒绝接收
    Refused,
    /// 下发超时或网络错误
    Unreachable,
    /// 没有满足条件的Worker
    NoAvailableWorker,
    /// 重新下发次数用尽
    RedispatchExhausted,
    /// Worker报告执行失败
    ExecutionFailed,
}

impl FailureKind {
    /// 不会再自动重新下发的失败
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FailureKind::RedispatchExhausted | FailureKind::ExecutionFailed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Refused => "refused",
            FailureKind::Unreachable => "unreachable",
            FailureKind::NoAvailableWorker => "no_available_worker",
            FailureKind::RedispatchExhausted => "redispatch_exhausted",
            FailureKind::ExecutionFailed => "execution_failed",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 失败现场
#[derive(Debug, Clone)]
pub struct FailureContext {
    pub plan_instance_id: String,
    pub job_instance_id: String,
    pub job_id: String,
    pub task_id: Option<String>,
    pub worker_id: Option<String>,
    pub kind: FailureKind,
    pub reason: String,
}

#[async_trait]
pub trait JobFailHandler: Send + Sync {
    fn name(&self) -> &str;

    /// 处理失败，例如告警或补偿；返回的错误只记录日志
    async fn handle(&self, ctx: &FailureContext) -> BrokerResult<()>;

    /// 是否终止所属计划实例
    fn terminate(&self, ctx: &FailureContext) -> bool;
}

/// 最终失败时终止计划实例，可恢复的下发失败继续重新下发
#[derive(Default)]
pub struct TerminateFailHandler;

#[async_trait]
impl JobFailHandler for TerminateFailHandler {
    fn name(&self) -> &str {
        TERMINATE_HANDLER
    }

    async fn handle(&self, ctx: &FailureContext) -> BrokerResult<()> {
        warn!(
            "作业 {} 失败 (类型: {}, 任务: {:?}, Worker: {:?}): {}",
            ctx.job_id, ctx.kind, ctx.task_id, ctx.worker_id, ctx.reason
        );
        Ok(())
    }

    fn terminate(&self, ctx: &FailureContext) -> bool {
        ctx.kind.is_terminal()
    }
}

/// 忽略失败，计划继续推进
#[derive(Default)]
pub struct IgnoreFailHandler;

#[async_trait]
impl JobFailHandler for IgnoreFailHandler {
    fn name(&self) -> &str {
        IGNORE_HANDLER
    }

    async fn handle(&self, ctx: &FailureContext) -> BrokerResult<()> {
        info!(
            "忽略作业 {} 的失败 (类型: {}): {}",
            ctx.job_id, ctx.kind, ctx.reason
        );
        Ok(())
    }

    fn terminate(&self, _ctx: &FailureContext) -> bool {
        false
    }
}

/// 按名称查找失败处理器
pub struct FailHandlerRegistry {
    handlers: DashMap<String, Arc<dyn JobFailHandler>>,
    default_handler: Arc<dyn JobFailHandler>,
}

impl FailHandlerRegistry {
    pub fn new() -> Self {
        let default_handler: Arc<dyn JobFailHandler> = Arc::new(TerminateFailHandler);
        let handlers: DashMap<String, Arc<dyn JobFailHandler>> = DashMap::new();
        handlers.insert(TERMINATE_HANDLER.to_string(), default_handler.clone());
        handlers.insert(IGNORE_HANDLER.to_string(), Arc::new(IgnoreFailHandler));
        Self {
            handlers,
            default_handler,
        }
    }

    pub fn register(&self, handler: Arc<dyn JobFailHandler>) {
        info!("注册失败处理器: {}", handler.name());
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// 校验作业引用的处理器名称
    pub fn ensure_known(&self, name: Option<&str>) -> BrokerResult<()> {
        match name {
            Some(name) if !self.contains(name) => Err(BrokerError::Validation(format!(
                "未知的失败处理器: {name}"
            ))),
            _ => Ok(()),
        }
    }

    /// 名称未注册时回退到默认处理器
    pub fn resolve(&self, name: Option<&str>) -> Arc<dyn JobFailHandler> {
        match name {
            None => self.default_handler.clone(),
            Some(name) => match self.handlers.get(name) {
                Some(handler) => handler.value().clone(),
                None => {
                    warn!("失败处理器 {} 未注册，使用默认处理器", name);
                    self.default_handler.clone()
                }
            },
        }
    }

    /// 调用处理器并返回是否终止计划实例
    pub async fn process(&self, name: Option<&str>, ctx: &FailureContext) -> bool {
        let handler = self.resolve(name);
        if let Err(e) = handler.handle(ctx).await {
            warn!("失败处理器 {} 处理出错: {}", handler.name(), e);
        }
        handler.terminate(ctx)
    }
}

impl Default for FailHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use broker_domain::{BrokerNode, ClusterRequest, ClusterResponse};

use crate::plan_service::PlanService;

/// 处理其它Broker发来的协调请求
pub struct ClusterHandler {
    node: BrokerNode,
    plan_service: Arc<PlanService>,
}

impl ClusterHandler {
    pub fn new(node: BrokerNode, plan_service: Arc<PlanService>) -> Self {
        Self { node, plan_service }
    }

    pub fn node(&self) -> &BrokerNode {
        &self.node
    }

    pub async fn handle(&self, request: ClusterRequest) -> ClusterResponse {
        debug!("收到集群请求: {:?}", request);
        match request {
            ClusterRequest::NodeInfo => match serde_json::to_value(&self.node) {
                Ok(value) => ClusterResponse::ok(value),
                Err(e) => ClusterResponse::fail(e.to_string()),
            },
            ClusterRequest::Schedule { plan_id } => {
                match self.plan_service.schedule_plan(&plan_id).await {
                    Ok(armed) => ClusterResponse::ok(json!({ "armed": armed })),
                    Err(e) => {
                        warn!("集群请求装配计划 {} 失败: {}", plan_id, e);
                        ClusterResponse::fail(e.to_string())
                    }
                }
            }
            ClusterRequest::Unschedule { plan_id } => {
                match self.plan_service.unschedule_plan(&plan_id).await {
                    Ok(removed) => ClusterResponse::ok(json!({ "removed": removed })),
                    Err(e) => {
                        warn!("集群请求取消计划 {} 失败: {}", plan_id, e);
                        ClusterResponse::fail(e.to_string())
                    }
                }
            }
            ClusterRequest::IsScheduling { plan_id } => {
                ClusterResponse::ok(json!(self.plan_service.is_scheduling(&plan_id)))
            }
        }
    }

    /// 处理JSON编码的请求，解码失败时返回失败响应
    pub async fn handle_json(&self, body: &str) -> ClusterResponse {
        match serde_json::from_str::<ClusterRequest>(body) {
            Ok(request) => self.handle(request).await,
            Err(e) => ClusterResponse::fail(format!("无效的集群请求: {e}")),
        }
    }
}

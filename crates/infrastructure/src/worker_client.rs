use std::time::Duration;

use async_trait::async_trait;
use broker_core::{BrokerError, BrokerResult};
use broker_domain::{DispatchOutcome, TaskDispatchRequest, Worker, WorkerClient};
use tracing::{debug, warn};

/// 通过HTTP向Worker下发任务
///
/// 2xx 视为接受，其它状态码视为拒绝，连接错误和超时视为不可达。
pub struct HttpWorkerClient {
    http_client: reqwest::Client,
}

impl HttpWorkerClient {
    pub fn new(timeout: Duration) -> BrokerResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BrokerError::Network(e.to_string()))?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn deliver(&self, worker: &Worker, request: &TaskDispatchRequest) -> DispatchOutcome {
        let url = format!("{}/api/v1/tasks", worker.address());

        match self.http_client.post(&url).json(request).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    debug!(
                        task_id = %request.task_id,
                        worker_id = %worker.id,
                        "Worker接受任务"
                    );
                    DispatchOutcome::Accepted
                } else {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    warn!(
                        "Worker {} 拒绝任务 {}: HTTP {} - {}",
                        worker.id, request.task_id, status, body
                    );
                    DispatchOutcome::Refused {
                        reason: format!("HTTP {status} - {body}"),
                    }
                }
            }
            Err(e) => {
                warn!("无法连接Worker {}: {}", worker.id, e);
                DispatchOutcome::Unreachable {
                    reason: e.to_string(),
                }
            }
        }
    }
}

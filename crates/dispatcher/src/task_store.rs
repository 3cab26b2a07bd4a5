use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use broker_core::{BrokerError, BrokerResult};
use broker_domain::{InstanceRepository, Task};

/// 任务状态读写
///
/// 同一任务的修改串行执行：重新读取、修改、写回。修改函数返回错误时不写回，
/// 仓储中的状态保持不变。
pub struct TaskStore {
    repository: Arc<dyn InstanceRepository>,
    guards: DashMap<String, Arc<Mutex<()>>>,
}

impl TaskStore {
    pub fn new(repository: Arc<dyn InstanceRepository>) -> Self {
        Self {
            repository,
            guards: DashMap::new(),
        }
    }

    pub fn repository(&self) -> &Arc<dyn InstanceRepository> {
        &self.repository
    }

    pub async fn insert(&self, task: &Task) -> BrokerResult<()> {
        self.repository.save_task(task).await
    }

    pub async fn get(&self, task_id: &str) -> BrokerResult<Task> {
        self.repository
            .find_task(task_id)
            .await?
            .ok_or_else(|| BrokerError::TaskNotFound {
                id: task_id.to_string(),
            })
    }

    pub async fn update<F, R>(&self, task_id: &str, f: F) -> BrokerResult<(Task, R)>
    where
        F: FnOnce(&mut Task) -> BrokerResult<R>,
    {
        let guard = self
            .guards
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _locked = guard.lock().await;

        let mut task = self.get(task_id).await?;
        let result = f(&mut task)?;
        self.repository.save_task(&task).await?;
        Ok((task, result))
    }

    /// 任务关闭后不再需要串行锁
    pub fn release(&self, task_id: &str) {
        self.guards.remove(task_id);
    }
}

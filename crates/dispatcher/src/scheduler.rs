//! 通用定时调度器
//!
//! 每个实体一个定时任务，到期后先通过 [`ScheduleCoordinator`] 确认归属再触发，
//! 触发完成后计算下一次时间重新装配。实体定义变化时用新一代定时任务替换旧的。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use broker_core::{BrokerResult, SharedClock};
use broker_infrastructure::ScheduleCoordinator;

/// 可被调度的实体
#[async_trait]
pub trait Schedulable: Send + Sync {
    fn schedule_id(&self) -> &str;

    /// 调度相关定义的指纹，相同指纹重复调度不会重新装配
    fn fingerprint(&self) -> String;

    /// 基于上一次触发时间计算下一次触发时间
    async fn next_trigger_at(
        &self,
        last_fire: Option<DateTime<Utc>>,
    ) -> BrokerResult<Option<DateTime<Utc>>>;

    async fn fire(&self, trigger_at: DateTime<Utc>) -> BrokerResult<()>;
}

struct ArmedEntry {
    generation: u64,
    fingerprint: String,
    due: DateTime<Utc>,
    token: CancellationToken,
    /// 触发期间持有；内容为最近一次到期的计划时间
    last_fire: Arc<Mutex<Option<DateTime<Utc>>>>,
}

pub struct Scheduler {
    entries: DashMap<String, ArmedEntry>,
    coordinator: Arc<dyn ScheduleCoordinator>,
    clock: SharedClock,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(coordinator: Arc<dyn ScheduleCoordinator>, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            coordinator,
            clock,
            generation: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// 装配实体的定时任务
    ///
    /// 返回 `true` 表示装配了新的定时任务；指纹未变或没有下一次触发时间时返回 `false`。
    /// 替换旧定时任务时先等待其正在进行的触发结束，新任务从旧任务最后一次触发往后计算。
    pub async fn schedule(self: &Arc<Self>, entity: Arc<dyn Schedulable>) -> BrokerResult<bool> {
        let id = entity.schedule_id().to_string();
        let fingerprint = entity.fingerprint();

        let previous = match self.entries.get(&id) {
            Some(entry) if entry.fingerprint == fingerprint => {
                debug!("实体 {} 的调度定义未变化，保持现有定时任务", id);
                return Ok(false);
            }
            Some(entry) => Some((entry.generation, entry.token.clone(), entry.last_fire.clone())),
            None => None,
        };

        let last_fire = match &previous {
            Some((generation, token, last_fire)) => {
                token.cancel();
                debug!("实体 {} 的旧定时任务(代 {})已取消", id, generation);
                *last_fire.lock().await
            }
            None => None,
        };

        let due = match entity.next_trigger_at(last_fire).await {
            Ok(Some(due)) => due,
            Ok(None) => {
                debug!("实体 {} 没有下一次触发时间", id);
                if self.disarm(&id).await {
                    self.coordinator.release(&id).await?;
                }
                return Ok(false);
            }
            Err(e) => {
                if let Some((generation, _, _)) = previous {
                    self.entries
                        .remove_if(&id, |_, entry| entry.generation == generation);
                }
                return Err(e);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = self.shutdown.child_token();
        let last_fire = Arc::new(Mutex::new(last_fire));
        let entry = ArmedEntry {
            generation,
            fingerprint,
            due,
            token: token.clone(),
            last_fire: last_fire.clone(),
        };
        if let Some(replaced) = self.entries.insert(id.clone(), entry) {
            replaced.token.cancel();
        }

        info!("实体 {} 已装配，下一次触发时间: {}", id, due);
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler
                .run_timer(entity, generation, token, last_fire, due)
                .await;
        });
        Ok(true)
    }

    /// 取消实体的定时任务并释放调度权
    ///
    /// 返回后不会再有新的触发开始；正在进行的触发会先完成。
    pub async fn unschedule(&self, id: &str) -> BrokerResult<bool> {
        let removed = self.disarm(id).await;
        if removed {
            self.coordinator.release(id).await?;
            info!("实体 {} 已取消调度", id);
        }
        Ok(removed)
    }

    async fn disarm(&self, id: &str) -> bool {
        match self.entries.remove(id) {
            Some((_, entry)) => {
                entry.token.cancel();
                let _in_flight = entry.last_fire.lock().await;
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn due_time(&self, id: &str) -> Option<DateTime<Utc>> {
        self.entries.get(id).map(|e| e.due)
    }

    pub fn scheduled_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn coordinator(&self) -> &Arc<dyn ScheduleCoordinator> {
        &self.coordinator
    }

    /// 停止所有定时任务
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.entries.clear();
        info!("调度器已停止");
    }

    fn is_current(&self, id: &str, generation: u64) -> bool {
        self.entries
            .get(id)
            .map(|e| e.generation == generation)
            .unwrap_or(false)
    }

    async fn run_timer(
        self: Arc<Self>,
        entity: Arc<dyn Schedulable>,
        generation: u64,
        token: CancellationToken,
        last_fire: Arc<Mutex<Option<DateTime<Utc>>>>,
        mut due: DateTime<Utc>,
    ) {
        let id = entity.schedule_id().to_string();
        loop {
            let wait = (due - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("实体 {} 的定时任务(代 {})已取消", id, generation);
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            {
                let mut fired = last_fire.lock().await;
                if token.is_cancelled() || !self.is_current(&id, generation) {
                    return;
                }
                match self.coordinator.acquire(&id).await {
                    Ok(true) => {
                        debug!("触发实体 {} (计划时间: {})", id, due);
                        if let Err(e) = entity.fire(due).await {
                            error!("实体 {} 触发失败: {}", id, e);
                        }
                    }
                    Ok(false) => {
                        debug!("实体 {} 由其它节点调度，跳过本次触发", id);
                    }
                    Err(e) => {
                        warn!("获取实体 {} 的调度权失败: {}", id, e);
                    }
                }
                *fired = Some(due);
            }

            let next = match entity.next_trigger_at(Some(due)).await {
                Ok(next) => next,
                Err(e) => {
                    error!("计算实体 {} 的下一次触发时间失败: {}", id, e);
                    None
                }
            };

            let rearmed = match self.entries.get_mut(&id) {
                Some(mut entry) if entry.generation == generation => {
                    if let Some(next) = next {
                        entry.due = next;
                        due = next;
                        true
                    } else {
                        false
                    }
                }
                _ => return,
            };

            if !rearmed {
                let removed = self
                    .entries
                    .remove_if(&id, |_, entry| entry.generation == generation)
                    .is_some();
                if removed {
                    if let Err(e) = self.coordinator.release(&id).await {
                        warn!("释放实体 {} 的调度权失败: {}", id, e);
                    }
                    info!("实体 {} 没有后续触发时间，已移出调度", id);
                }
                return;
            }
            debug!("实体 {} 下一次触发时间: {}", id, due);
        }
    }
}

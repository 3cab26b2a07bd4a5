use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::debug;

use broker_domain::Worker;
use broker_infrastructure::LbStatisticsRepository;

/// 一次选择的上下文
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    /// 轮询游标所属的上下文，通常是作业ID
    pub cursor_key: &'a str,
    /// 一致性哈希使用的键
    pub dispatch_key: &'a str,
    pub appoint_worker_id: Option<&'a str>,
}

/// Worker选择策略
///
/// 候选列表非空时，除指定策略外都必须选出一个Worker。
pub trait WorkerSelectStrategy: Send + Sync {
    fn select<'w>(&self, candidates: &'w [Worker], ctx: &SelectionContext<'_>)
        -> Option<&'w Worker>;

    fn name(&self) -> &str;
}

/// 按ID排序后的候选下标，保证结果与传入顺序无关
fn sorted_indices(candidates: &[Worker]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..candidates.len()).collect();
    indices.sort_by(|a, b| candidates[*a].id.cmp(&candidates[*b].id));
    indices
}

pub struct RoundRobinStrategy {
    cursors: DashMap<String, Arc<AtomicUsize>>,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            cursors: DashMap::new(),
        }
    }

    fn next_cursor(&self, key: &str) -> usize {
        let counter = self
            .cursors
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone();
        counter.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSelectStrategy for RoundRobinStrategy {
    fn select<'w>(
        &self,
        candidates: &'w [Worker],
        ctx: &SelectionContext<'_>,
    ) -> Option<&'w Worker> {
        if candidates.is_empty() {
            return None;
        }
        let indices = sorted_indices(candidates);
        let index = self.next_cursor(ctx.cursor_key) % indices.len();
        let selected = &candidates[indices[index]];

        debug!(
            "轮询策略选择Worker: {} (索引: {}/{})",
            selected.id,
            index,
            indices.len()
        );
        Some(selected)
    }

    fn name(&self) -> &str {
        "round_robin"
    }
}

/// 加权轮询
///
/// 按权重展开为槽位序列，每一轮把仍有剩余权重的Worker各放一次，
/// 任意连续 sum(weights) 次选择中每个Worker恰好被选中 weight 次。
pub struct WeightedRoundRobinStrategy {
    cursors: DashMap<String, Arc<AtomicUsize>>,
}

impl WeightedRoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            cursors: DashMap::new(),
        }
    }

    fn slots(candidates: &[Worker]) -> Vec<usize> {
        let indices = sorted_indices(candidates);
        let max_weight = indices
            .iter()
            .map(|i| candidates[*i].weight.max(1))
            .max()
            .unwrap_or(1);

        let mut slots = Vec::new();
        for round in 0..max_weight {
            for i in &indices {
                if candidates[*i].weight.max(1) > round {
                    slots.push(*i);
                }
            }
        }
        slots
    }
}

impl Default for WeightedRoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSelectStrategy for WeightedRoundRobinStrategy {
    fn select<'w>(
        &self,
        candidates: &'w [Worker],
        ctx: &SelectionContext<'_>,
    ) -> Option<&'w Worker> {
        if candidates.is_empty() {
            return None;
        }
        let slots = Self::slots(candidates);
        let counter = self
            .cursors
            .entry(ctx.cursor_key.to_string())
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone();
        let position = counter.fetch_add(1, Ordering::Relaxed) % slots.len();
        let selected = &candidates[slots[position]];

        debug!(
            "加权轮询策略选择Worker: {} (权重: {}, 槽位: {}/{})",
            selected.id,
            selected.weight,
            position,
            slots.len()
        );
        Some(selected)
    }

    fn name(&self) -> &str {
        "weighted_round_robin"
    }
}

#[derive(Default)]
pub struct RandomStrategy;

impl RandomStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl WorkerSelectStrategy for RandomStrategy {
    fn select<'w>(
        &self,
        candidates: &'w [Worker],
        _ctx: &SelectionContext<'_>,
    ) -> Option<&'w Worker> {
        if candidates.is_empty() {
            return None;
        }
        let index = rand::rng().random_range(0..candidates.len());
        debug!("随机策略选择Worker: {}", candidates[index].id);
        candidates.get(index)
    }

    fn name(&self) -> &str {
        "random"
    }
}

/// 下发次数最少优先，次数相同时按ID
pub struct LeastFrequentlyUsedStrategy {
    statistics: Arc<LbStatisticsRepository>,
}

impl LeastFrequentlyUsedStrategy {
    pub fn new(statistics: Arc<LbStatisticsRepository>) -> Self {
        Self { statistics }
    }
}

impl WorkerSelectStrategy for LeastFrequentlyUsedStrategy {
    fn select<'w>(
        &self,
        candidates: &'w [Worker],
        _ctx: &SelectionContext<'_>,
    ) -> Option<&'w Worker> {
        let stats = self
            .statistics
            .snapshot(candidates.iter().map(|w| w.id.as_str()));
        let selected = candidates.iter().min_by(|a, b| {
            let count_a = stats.get(&a.id).map(|s| s.dispatch_count).unwrap_or(0);
            let count_b = stats.get(&b.id).map(|s| s.dispatch_count).unwrap_or(0);
            count_a.cmp(&count_b).then_with(|| a.id.cmp(&b.id))
        })?;

        debug!(
            "最少使用策略选择Worker: {} (下发次数: {})",
            selected.id,
            stats.get(&selected.id).map(|s| s.dispatch_count).unwrap_or(0)
        );
        Some(selected)
    }

    fn name(&self) -> &str {
        "least_frequently_used"
    }
}

/// 最久未使用优先，从未下发过的Worker排在最前
pub struct LeastRecentlyUsedStrategy {
    statistics: Arc<LbStatisticsRepository>,
}

impl LeastRecentlyUsedStrategy {
    pub fn new(statistics: Arc<LbStatisticsRepository>) -> Self {
        Self { statistics }
    }
}

impl WorkerSelectStrategy for LeastRecentlyUsedStrategy {
    fn select<'w>(
        &self,
        candidates: &'w [Worker],
        _ctx: &SelectionContext<'_>,
    ) -> Option<&'w Worker> {
        let stats = self
            .statistics
            .snapshot(candidates.iter().map(|w| w.id.as_str()));
        let last = |w: &Worker| stats.get(&w.id).and_then(|s| s.last_dispatch_at);
        let selected = candidates
            .iter()
            .min_by(|a, b| last(a).cmp(&last(b)).then_with(|| a.id.cmp(&b.id)))?;

        debug!(
            "最近最少使用策略选择Worker: {} (上次下发: {:?})",
            selected.id,
            last(selected)
        );
        Some(selected)
    }

    fn name(&self) -> &str {
        "least_recently_used"
    }
}

/// 一致性哈希
///
/// 每个Worker在环上有固定数量的虚拟节点，位置只取决于Worker ID，
/// 候选集合变化时只有落在变化节点上的键会改变归属。
pub struct ConsistentHashStrategy {
    virtual_nodes: usize,
}

const SLOTS_PER_DIGEST: usize = 4;

impl ConsistentHashStrategy {
    pub const DEFAULT_VIRTUAL_NODES: usize = 160;

    pub fn new() -> Self {
        Self::with_virtual_nodes(Self::DEFAULT_VIRTUAL_NODES)
    }

    pub fn with_virtual_nodes(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(SLOTS_PER_DIGEST),
        }
    }

    fn hash_slots(input: &str) -> [u32; SLOTS_PER_DIGEST] {
        let digest = Sha256::digest(input.as_bytes());
        let mut slots = [0u32; SLOTS_PER_DIGEST];
        for (i, slot) in slots.iter_mut().enumerate() {
            let offset = i * 4;
            *slot = u32::from_be_bytes([
                digest[offset],
                digest[offset + 1],
                digest[offset + 2],
                digest[offset + 3],
            ]);
        }
        slots
    }

    fn ring(&self, candidates: &[Worker]) -> BTreeMap<u32, usize> {
        let mut ring = BTreeMap::new();
        for index in sorted_indices(candidates) {
            let worker = &candidates[index];
            for replica in 0..self.virtual_nodes / SLOTS_PER_DIGEST {
                for point in Self::hash_slots(&format!("{}#{}", worker.id, replica)) {
                    ring.entry(point).or_insert(index);
                }
            }
        }
        ring
    }

    pub fn key_point(key: &str) -> u32 {
        Self::hash_slots(key)[0]
    }
}

impl Default for ConsistentHashStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSelectStrategy for ConsistentHashStrategy {
    fn select<'w>(
        &self,
        candidates: &'w [Worker],
        ctx: &SelectionContext<'_>,
    ) -> Option<&'w Worker> {
        if candidates.is_empty() {
            return None;
        }
        let ring = self.ring(candidates);
        let point = Self::key_point(ctx.dispatch_key);
        let index = ring
            .range(point..)
            .next()
            .or_else(|| ring.iter().next())
            .map(|(_, index)| *index)?;
        let selected = &candidates[index];

        debug!(
            "一致性哈希策略选择Worker: {} (键: {})",
            selected.id, ctx.dispatch_key
        );
        Some(selected)
    }

    fn name(&self) -> &str {
        "consistent_hash"
    }
}

/// 指定Worker，目标不可用时不做回退
#[derive(Default)]
pub struct AppointStrategy;

impl AppointStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl WorkerSelectStrategy for AppointStrategy {
    fn select<'w>(
        &self,
        candidates: &'w [Worker],
        ctx: &SelectionContext<'_>,
    ) -> Option<&'w Worker> {
        let target = ctx.appoint_worker_id?;
        let selected = candidates.iter().find(|w| w.id == target);
        if selected.is_none() {
            debug!("指定的Worker {} 不在候选列表中", target);
        }
        selected
    }

    fn name(&self) -> &str {
        "appoint"
    }
}

/// 候选Worker按ID分组计数，测试和诊断使用
pub fn selection_histogram<'a, I>(selected: I) -> HashMap<String, usize>
where
    I: IntoIterator<Item = &'a Worker>,
{
    let mut histogram = HashMap::new();
    for worker in selected {
        *histogram.entry(worker.id.clone()).or_insert(0) += 1;
    }
    histogram
}

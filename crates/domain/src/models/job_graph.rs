use std::collections::{HashMap, HashSet, VecDeque};

use broker_core::{BrokerError, BrokerResult};

use super::job::Job;

/// 计划版本内的作业DAG
///
/// 构建时完成校验并建立父节点索引，之后只读，可在线程间共享。
#[derive(Debug, Clone)]
pub struct JobGraph {
    jobs: Vec<Job>,
    index: HashMap<String, usize>,
    parents: HashMap<String, Vec<String>>,
    roots: Vec<String>,
}

impl JobGraph {
    pub fn new(jobs: Vec<Job>) -> BrokerResult<Self> {
        if jobs.is_empty() {
            return Err(BrokerError::Validation("作业图不能为空".to_string()));
        }

        let mut index = HashMap::with_capacity(jobs.len());
        for (i, job) in jobs.iter().enumerate() {
            if job.id.trim().is_empty() {
                return Err(BrokerError::Validation("作业ID不能为空".to_string()));
            }
            if job.executor_option.name.trim().is_empty() {
                return Err(BrokerError::Validation(format!(
                    "作业 {} 未指定执行器",
                    job.id
                )));
            }
            if job.dispatch_option.shard_count == 0 {
                return Err(BrokerError::Validation(format!(
                    "作业 {} 的分片数必须大于0",
                    job.id
                )));
            }
            if index.insert(job.id.clone(), i).is_some() {
                return Err(BrokerError::Validation(format!("作业ID重复: {}", job.id)));
            }
        }

        let mut parents: HashMap<String, Vec<String>> = HashMap::new();
        for job in &jobs {
            let mut seen = HashSet::new();
            for child in &job.children {
                if !index.contains_key(child) {
                    return Err(BrokerError::Validation(format!(
                        "作业 {} 引用了不存在的子作业 {}",
                        job.id, child
                    )));
                }
                if seen.insert(child) {
                    parents.entry(child.clone()).or_default().push(job.id.clone());
                }
            }
        }

        let roots: Vec<String> = jobs
            .iter()
            .filter(|j| !parents.contains_key(&j.id))
            .map(|j| j.id.clone())
            .collect();

        // Kahn 拓扑排序，无法全部出队说明存在环
        let mut in_degree: HashMap<&str, usize> = jobs
            .iter()
            .map(|j| (j.id.as_str(), parents.get(&j.id).map_or(0, Vec::len)))
            .collect();
        let mut queue: VecDeque<&str> = roots.iter().map(String::as_str).collect();
        let mut visited = 0usize;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            let job = &jobs[index[id]];
            let mut seen = HashSet::new();
            for child in job.children.iter().filter(|c| seen.insert(*c)) {
                if let Some(degree) = in_degree.get_mut(child.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(child.as_str());
                    }
                }
            }
        }
        if visited != jobs.len() {
            return Err(BrokerError::Validation("作业图中存在环".to_string()));
        }

        Ok(Self {
            jobs,
            index,
            parents,
            roots,
        })
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.index.get(id).map(|&i| &self.jobs[i])
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// 没有父作业的作业
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn parents(&self, id: &str) -> &[String] {
        self.parents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn children(&self, id: &str) -> &[String] {
        self.job(id).map(|j| j.children.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{ExecuteType, ExecutorOption};

    fn job(id: &str, children: &[&str]) -> Job {
        Job::new(id, ExecutorOption::new("echo", ExecuteType::Function))
            .with_children(children.iter().copied())
    }

    #[test]
    fn test_diamond_graph_builds_parent_index() {
        let graph = JobGraph::new(vec![
            job("a", &["b", "c"]),
            job("b", &["d"]),
            job("c", &["d"]),
            job("d", &[]),
        ])
        .unwrap();

        assert_eq!(graph.roots(), ["a".to_string()]);
        assert_eq!(graph.parents("d"), ["b".to_string(), "c".to_string()]);
        assert!(graph.parents("a").is_empty());
        assert_eq!(graph.children("a").len(), 2);
        assert_eq!(graph.len(), 4);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let result = JobGraph::new(vec![job("a", &["b"]), job("b", &["c"]), job("c", &["a"])]);
        assert!(matches!(result, Err(BrokerError::Validation(msg)) if msg.contains("环")));

        let self_loop = JobGraph::new(vec![job("a", &["a"])]);
        assert!(self_loop.is_err());
    }

    #[test]
    fn test_cycle_below_root_is_rejected() {
        let result = JobGraph::new(vec![job("root", &["x"]), job("x", &["y"]), job("y", &["x"])]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_child_and_duplicates_are_rejected() {
        assert!(JobGraph::new(vec![job("a", &["missing"])]).is_err());
        assert!(JobGraph::new(vec![job("a", &[]), job("a", &[])]).is_err());
        assert!(JobGraph::new(vec![]).is_err());
    }

    #[test]
    fn test_missing_executor_is_rejected() {
        let bad = Job::new("a", ExecutorOption::new("", ExecuteType::Shell));
        assert!(JobGraph::new(vec![bad]).is_err());
    }
}

//! 测试数据构建器

use std::collections::HashMap;

use broker_domain::{
    DispatchOption, ExecuteType, ExecutorOption, Job, LoadBalanceType, PlanDefinition,
    ScheduleOption, TriggerType, WorkerMetric, WorkerRegistration,
};

/// Worker注册请求构建器，默认支持 `echo` 执行器且队列有余量
pub struct WorkerRegistrationBuilder {
    registration: WorkerRegistration,
}

impl WorkerRegistrationBuilder {
    pub fn new(port: u16) -> Self {
        Self {
            registration: WorkerRegistration {
                protocol: "http".to_string(),
                host: "127.0.0.1".to_string(),
                port,
                executors: HashMap::from([("echo".to_string(), ExecuteType::Function)]),
                tags: HashMap::new(),
                weight: None,
                metric: Some(WorkerMetric {
                    cpu_available: 4.0,
                    ram_available_gb: 8.0,
                    queue_remaining: 10,
                    executing_task_ids: Vec::new(),
                }),
            },
        }
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.registration.host = host.to_string();
        self
    }

    pub fn with_executor(mut self, name: &str) -> Self {
        self.registration
            .executors
            .insert(name.to_string(), ExecuteType::Function);
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.registration.weight = Some(weight);
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.registration
            .tags
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    pub fn with_queue_remaining(mut self, remaining: u32) -> Self {
        if let Some(metric) = self.registration.metric.as_mut() {
            metric.queue_remaining = remaining;
        }
        self
    }

    pub fn build(self) -> WorkerRegistration {
        self.registration
    }
}

/// 作业构建器，默认使用 `echo` 执行器
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            job: Job::new(id, ExecutorOption::new("echo", ExecuteType::Function)),
        }
    }

    pub fn with_executor(mut self, name: &str) -> Self {
        self.job.executor_option.name = name.to_string();
        self
    }

    pub fn with_children(mut self, children: &[&str]) -> Self {
        self.job.children = children.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_load_balance(mut self, load_balance: LoadBalanceType) -> Self {
        self.job.dispatch_option.load_balance = Some(load_balance);
        self
    }

    pub fn with_appoint(mut self, worker_id: &str) -> Self {
        self.job.dispatch_option = DispatchOption {
            load_balance: Some(LoadBalanceType::Appoint),
            appoint_worker_id: Some(worker_id.to_string()),
            ..self.job.dispatch_option
        };
        self
    }

    pub fn with_shards(mut self, shard_count: u32) -> Self {
        self.job.dispatch_option.shard_count = shard_count;
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.job.retry = retry;
        self
    }

    pub fn with_fail_handler(mut self, name: &str) -> Self {
        self.job.fail_handler = Some(name.to_string());
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

/// 计划定义构建器，默认通过API触发
pub struct PlanDefinitionBuilder {
    definition: PlanDefinition,
}

impl PlanDefinitionBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            definition: PlanDefinition {
                name: name.to_string(),
                description: String::new(),
                trigger_type: TriggerType::Api,
                schedule_option: ScheduleOption::none(),
                allow_concurrent: false,
                enabled: true,
                jobs: Vec::new(),
            },
        }
    }

    pub fn with_schedule(mut self, option: ScheduleOption) -> Self {
        self.definition.trigger_type = TriggerType::Schedule;
        self.definition.schedule_option = option;
        self
    }

    pub fn allow_concurrent(mut self) -> Self {
        self.definition.allow_concurrent = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.definition.enabled = false;
        self
    }

    pub fn with_job(mut self, job: Job) -> Self {
        self.definition.jobs.push(job);
        self
    }

    pub fn build(self) -> PlanDefinition {
        self.definition
    }
}

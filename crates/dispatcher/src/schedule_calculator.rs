use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;
use tracing::{debug, warn};

use broker_core::{BrokerError, BrokerResult};
use broker_domain::{ScheduleOption, ScheduleType};

/// 计算下一次触发时间所需的运行上下文
#[derive(Debug, Clone, Default)]
pub struct ScheduleContext {
    /// 首次调度起点
    pub start_at: Option<DateTime<Utc>>,
    pub last_trigger_at: Option<DateTime<Utc>>,
    /// 上一个计划实例的结束时间，FixedDelay使用
    pub last_finished_at: Option<DateTime<Utc>>,
    /// 上一个计划实例是否仍在运行
    pub previous_running: bool,
}

/// 调度时间计算
pub struct ScheduleCalculator;

impl ScheduleCalculator {
    /// 校验调度配置，包括CRON语法
    pub fn validate(option: &ScheduleOption) -> BrokerResult<()> {
        option.validate()?;
        if option.schedule_type == ScheduleType::Cron {
            Self::parse_cron(option)?;
        }
        Ok(())
    }

    fn parse_cron(option: &ScheduleOption) -> BrokerResult<Schedule> {
        let expr = option.cron.as_deref().unwrap_or("").trim();
        Schedule::from_str(expr).map_err(|e| BrokerError::InvalidCron {
            expr: expr.to_string(),
            message: e.to_string(),
        })
    }

    /// 下一次触发时间，`None` 表示不再触发；结果不早于 `now`
    pub fn next_trigger(
        option: &ScheduleOption,
        ctx: &ScheduleContext,
        now: DateTime<Utc>,
    ) -> BrokerResult<Option<DateTime<Utc>>> {
        let first = ctx.start_at.unwrap_or(now) + Duration::milliseconds(option.delay_ms as i64);
        let interval = Duration::milliseconds(option.interval_ms as i64);

        let next = match option.schedule_type {
            ScheduleType::None => None,
            ScheduleType::Once => match ctx.last_trigger_at {
                Some(_) => None,
                None => Some(first),
            },
            ScheduleType::FixedRate => match ctx.last_trigger_at {
                Some(last) => Some(last + interval),
                None => Some(first),
            },
            ScheduleType::FixedDelay => match ctx.last_trigger_at {
                None => Some(first),
                Some(_) if ctx.previous_running => {
                    debug!("上一个计划实例仍在运行，{}ms 后重新检查", option.interval_ms);
                    Some(now + interval)
                }
                Some(last) => Some(ctx.last_finished_at.unwrap_or(last) + interval),
            },
            ScheduleType::Cron => {
                let schedule = Self::parse_cron(option)?;
                let from = ctx.last_trigger_at.unwrap_or_else(|| first.max(now));
                let next = schedule.after(&from).next();
                if next.is_none() {
                    warn!(
                        "CRON表达式 {:?} 之后没有可用的执行时间",
                        option.cron
                    );
                }
                next
            }
        };

        Ok(next.map(|t| t.max(now)))
    }

    /// 从指定时间开始的多个CRON执行时间
    pub fn upcoming_cron_times(
        option: &ScheduleOption,
        from: DateTime<Utc>,
        count: usize,
    ) -> BrokerResult<Vec<DateTime<Utc>>> {
        let schedule = Self::parse_cron(option)?;
        Ok(schedule.after(&from).take(count).collect())
    }
}

// ==========================================
// 种子包衣订单核心 - 运行时配置
// ==========================================
// 职责: 汇总守护进程启动所需配置(config_kv + 环境变量覆写)
// 优先级: 环境变量 > config_kv > 默认值
// ==========================================

use crate::config::config_manager::ConfigManager;
use crate::repository::error::RepositoryResult;
use std::time::Duration;

/// 覆写 tick 间隔的环境变量(毫秒)
pub const ENV_TICK_MS: &str = "SEED_TREATMENT_TICK_MS";

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub notification_queue_capacity: usize,
    pub deep_link_base: String,
    pub lab_workflow_enabled: bool,
    pub default_tkw_measurement_interval_minutes: u32,
}

impl SchedulerConfig {
    /// 从 ConfigManager 加载并应用环境变量覆写
    pub fn load(config: &ConfigManager) -> RepositoryResult<Self> {
        let mut tick_ms = config.get_scheduler_tick_interval_ms()?;
        if let Some(env_ms) = parse_tick_override(std::env::var(ENV_TICK_MS).ok().as_deref()) {
            tracing::info!(env = ENV_TICK_MS, tick_ms = env_ms, "tick 间隔由环境变量覆写");
            tick_ms = env_ms;
        }

        Ok(Self {
            tick_interval: Duration::from_millis(tick_ms),
            notification_queue_capacity: config.get_notification_queue_capacity()?,
            deep_link_base: config.get_deep_link_base()?,
            lab_workflow_enabled: config.is_lab_workflow_enabled()?,
            default_tkw_measurement_interval_minutes: config
                .get_default_tkw_measurement_interval_minutes()?,
        })
    }
}

fn parse_tick_override(raw: Option<&str>) -> Option<u64> {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tick_override() {
        assert_eq!(parse_tick_override(Some(" 1500 ")), Some(1500));
        assert_eq!(parse_tick_override(Some("0")), None);
        assert_eq!(parse_tick_override(Some("fast")), None);
        assert_eq!(parse_tick_override(None), None);
    }
}

// ==========================================
// 种子包衣订单核心 - 配置层
// ==========================================
// 职责: 系统配置管理(config_kv 表 + 环境变量覆写)
// ==========================================

pub mod config_manager;
pub mod scheduler_config;

// 重导出核心配置管理器
pub use config_manager::{config_keys, defaults, ConfigManager, GLOBAL_SCOPE};
pub use scheduler_config::SchedulerConfig;

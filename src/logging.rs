// ==========================================
// 种子包衣订单核心 - 日志系统初始化
// ==========================================
// 使用 tracing + tracing-subscriber
// - RUST_LOG 控制级别(默认 info)
// - SEED_TREATMENT_LOG_JSON=1 时输出 JSON 行(便于采集)
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

pub const ENV_LOG_JSON: &str = "SEED_TREATMENT_LOG_JSON";

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 初始化日志系统
///
/// # 示例
/// ```no_run
/// seed_treatment::logging::init();
/// ```
pub fn init() {
    let json = std::env::var(ENV_LOG_JSON)
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false);
    if json {
        init_json();
        return;
    }

    fmt()
        .with_env_filter(default_filter())
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .init();
}

/// JSON 行格式输出
pub fn init_json() {
    fmt()
        .json()
        .with_env_filter(default_filter())
        .with_current_span(true)
        .with_target(true)
        .init();
}

/// 初始化测试环境的日志系统(可重复调用)
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

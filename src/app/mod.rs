// ==========================================
// 种子包衣订单核心 - 应用层
// ==========================================
// 职责: 应用组装与后台任务
// ==========================================

pub mod daemon;
pub mod state;

// 重导出
pub use daemon::MeasurementDaemon;
pub use state::{get_default_db_path, open_store, AppState, ENV_DB_PATH};

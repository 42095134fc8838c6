// ==========================================
// 种子包衣订单核心 - 应用状态
// ==========================================
// 职责: 打开存储、组装 Repository / Engine / API 实例
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::api::{MeasurementApi, OrderApi, OrderSettings};
use crate::config::{ConfigManager, SchedulerConfig};
use crate::db::{ensure_schema, open_sqlite_connection, read_schema_version, CURRENT_SCHEMA_VERSION};
use crate::engine::clock::Clock;
use crate::engine::measurement_scheduler::MeasurementScheduler;
use crate::engine::notifier::Notifier;
use crate::repository::error::RepositoryResult;
use crate::repository::{
    MeasurementRepository, OperatorRepository, OrderRepository, ProductRepository,
    RecipeRepository,
};

/// 数据库路径环境变量
pub const ENV_DB_PATH: &str = "SEED_TREATMENT_DB_PATH";

/// 打开共享连接: 统一 PRAGMA + 建表 + SQL 观测
pub fn open_store(db_path: &str) -> RepositoryResult<Arc<Mutex<Connection>>> {
    let mut conn = open_sqlite_connection(db_path)?;
    ensure_schema(&conn)?;
    crate::perf::install_sqlite_tracing(&mut conn);

    match read_schema_version(&conn)? {
        Some(v) if v > CURRENT_SCHEMA_VERSION => tracing::warn!(
            db_version = v,
            expected = CURRENT_SCHEMA_VERSION,
            "数据库 schema_version 高于当前程序版本"
        ),
        v => tracing::info!(schema_version = ?v, db_path, "数据库已就绪"),
    }

    Ok(Arc::new(Mutex::new(conn)))
}

// ==========================================
// AppState
// ==========================================
pub struct AppState {
    pub config_manager: Arc<ConfigManager>,
    pub product_repo: Arc<ProductRepository>,
    pub operator_repo: Arc<OperatorRepository>,
    pub measurement_repo: Arc<MeasurementRepository>,
    pub scheduler: Arc<MeasurementScheduler>,
    pub order_api: Arc<OrderApi>,
    pub measurement_api: Arc<MeasurementApi>,
}

impl AppState {
    /// 基于共享连接组装应用
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        config: &SchedulerConfig,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> RepositoryResult<Self> {
        // ==========================================
        // Repository 层
        // ==========================================
        let config_manager = Arc::new(ConfigManager::from_connection(conn.clone())?);
        let order_repo = Arc::new(OrderRepository::new(conn.clone()));
        let product_repo = Arc::new(ProductRepository::new(conn.clone()));
        let recipe_repo = Arc::new(RecipeRepository::new(conn.clone()));
        let measurement_repo = Arc::new(MeasurementRepository::new(conn.clone()));
        let operator_repo = Arc::new(OperatorRepository::new(conn));

        // ==========================================
        // Engine 层
        // ==========================================
        let scheduler = Arc::new(MeasurementScheduler::new(
            measurement_repo.clone(),
            notifier.clone(),
            clock.clone(),
            config.deep_link_base.clone(),
        ));

        // ==========================================
        // API 层
        // ==========================================
        let order_api = Arc::new(OrderApi::new(
            order_repo.clone(),
            product_repo.clone(),
            recipe_repo,
            measurement_repo.clone(),
            scheduler.clone(),
            notifier.clone(),
            clock.clone(),
            OrderSettings {
                lab_workflow_enabled: config.lab_workflow_enabled,
                default_tkw_measurement_interval_minutes: config
                    .default_tkw_measurement_interval_minutes,
                deep_link_base: config.deep_link_base.clone(),
            },
        ));
        let measurement_api = Arc::new(MeasurementApi::new(
            measurement_repo.clone(),
            order_repo,
            notifier,
            clock,
            config.deep_link_base.clone(),
        ));

        tracing::info!("AppState 初始化完成");
        Ok(Self {
            config_manager,
            product_repo,
            operator_repo,
            measurement_repo,
            scheduler,
            order_api,
            measurement_api,
        })
    }
}

/// 获取默认数据库路径
///
/// - 环境变量 SEED_TREATMENT_DB_PATH 优先
/// - 开发构建: 用户数据目录/seed-treatment-dev/seed_treatment.db
/// - 发布构建: 用户数据目录/seed-treatment/seed_treatment.db
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var(ENV_DB_PATH) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./seed_treatment.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir_name = if cfg!(debug_assertions) {
            "seed-treatment-dev"
        } else {
            "seed-treatment"
        };
        let dir = data_dir.join(dir_name);
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "数据目录创建失败,使用当前目录");
        } else {
            path = dir.join("seed_treatment.db");
        }
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }
}

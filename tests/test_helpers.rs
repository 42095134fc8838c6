// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 提供测试所需的数据库初始化、测试数据生成、记录型通知者等功能
// ==========================================

#![allow(dead_code)]

use rusqlite::Connection;
use seed_treatment::app::{open_store, AppState};
use seed_treatment::config::{config_keys, ConfigManager, SchedulerConfig};
use seed_treatment::domain::operator::{Operator, Role};
use seed_treatment::domain::order::{NewOrder, NewProductDetail, Product};
use seed_treatment::domain::types::Packaging;
use seed_treatment::engine::{Clock, ManualClock, Notification, Notifier, Recipient};
use seed_treatment::repository::{OperatorRepository, ProductRepository};
use std::error::Error;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// 测试基准时间(毫秒)
pub const T0: i64 = 1_700_000_000_000;

pub const COMPANY: &str = "company-1";
pub const OPERATOR: &str = "op-1";
pub const LAB_USER: &str = "lab-1";

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file
        .path()
        .to_str()
        .ok_or("临时文件路径不是 UTF-8")?
        .to_string();

    let conn = Connection::open(&db_path)?;
    seed_treatment::db::ensure_schema(&conn)?;

    Ok((temp_file, db_path))
}

// ==========================================
// 记录型通知者
// ==========================================

/// 记录所有通知,供断言使用
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    /// 深链包含 /measurements/ 的通知(测量到期)
    pub fn measurement_due(&self) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.deep_link.contains("/measurements/"))
            .collect()
    }

    pub fn to_recipient(&self, recipient: &Recipient) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| &n.recipient == recipient)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.sent.lock().unwrap().push(notification);
    }
}

// ==========================================
// 测试环境
// ==========================================

pub struct TestEnv {
    pub _temp_file: NamedTempFile,
    pub db_path: String,
    pub conn: Arc<Mutex<Connection>>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub state: AppState,
}

/// 创建完整测试环境(已写入产品与人员基础数据)
pub fn setup_env(lab_workflow_enabled: bool) -> TestEnv {
    let notifier = Arc::new(RecordingNotifier::default());
    setup_env_with_notifier(lab_workflow_enabled, notifier.clone(), notifier)
}

pub fn setup_env_with_notifier(
    lab_workflow_enabled: bool,
    recorder: Arc<RecordingNotifier>,
    notifier: Arc<dyn Notifier>,
) -> TestEnv {
    seed_treatment::logging::init_test();
    let (temp_file, db_path) = create_test_db().unwrap();
    let conn = open_store(&db_path).unwrap();

    let config_manager = ConfigManager::from_connection(conn.clone()).unwrap();
    config_manager
        .set_global_config_value(
            config_keys::LAB_WORKFLOW_ENABLED,
            if lab_workflow_enabled { "true" } else { "false" },
        )
        .unwrap();
    let config = SchedulerConfig::load(&config_manager).unwrap();

    let clock = Arc::new(ManualClock::new(T0));
    let state = AppState::new(
        conn.clone(),
        &config,
        notifier,
        clock.clone() as Arc<dyn Clock>,
    )
    .unwrap();

    seed_reference_data(&conn);

    TestEnv {
        _temp_file: temp_file,
        db_path,
        conn,
        clock,
        notifier: recorder,
        state,
    }
}

/// 写入产品与人员
pub fn seed_reference_data(conn: &Arc<Mutex<Connection>>) {
    let products = ProductRepository::new(conn.clone());
    for (id, name, density) in [
        ("p-water", "Water", 1.0),
        ("p-maxim", "Maxim XL 035", 1.04),
        ("p-cruiser", "Cruiser 350 FS", 1.179),
    ] {
        products
            .upsert(&Product {
                id: id.to_string(),
                name: name.to_string(),
                active_ingredient: None,
                density,
            })
            .unwrap();
    }

    let operators = OperatorRepository::new(conn.clone());
    for (id, roles) in [
        (OPERATOR, vec![Role::Operator]),
        ("op-2", vec![Role::Operator]),
        (LAB_USER, vec![Role::Laboratory]),
    ] {
        operators
            .upsert(&Operator {
                id: id.to_string(),
                company_id: COMPANY.to_string(),
                name: id.to_uppercase(),
                roles,
                push_token: Some(format!("tok-{}", id)),
            })
            .unwrap();
    }
}

// ==========================================
// 测试数据构造
// ==========================================

/// 标准订单: 500 kg, 25 kg/袋, 额外浆液 5%, 两个产品
pub fn new_order(lot_number: &str, tkw: Option<f64>) -> NewOrder {
    NewOrder {
        lot_number: lot_number.to_string(),
        company_id: COMPANY.to_string(),
        operator_id: None,
        tkw,
        seeds_to_treat_kg: 500.0,
        extra_slurry_percent: Some(5.0),
        packaging: Some(Packaging::InKg),
        bag_size: Some(25.0),
        tkw_measurement_interval_minutes: Some(30),
        product_details: vec![
            NewProductDetail {
                product_id: "p-water".to_string(),
                index: 0,
                rate: 200.0,
                rate_unit: "ML".to_string(),
                rate_type: "PER_100KG".to_string(),
            },
            NewProductDetail {
                product_id: "p-maxim".to_string(),
                index: 1,
                rate: 100.0,
                rate_unit: "ML".to_string(),
                rate_type: "PER_100KG".to_string(),
            },
        ],
    }
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() <= 1e-6 * expected.abs().max(1.0),
        "actual={} expected={}",
        actual,
        expected
    );
}

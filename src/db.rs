// ==========================================
// 种子包衣订单核心 - SQLite 连接初始化与建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为(外键 + busy_timeout)
// - ensure_schema 幂等建表,并记录 schema_version
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout(毫秒)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// foreign_keys 与 busy_timeout 都需要每个连接单独设置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- ===== 配置 =====
CREATE TABLE IF NOT EXISTS config_scope (
    scope_id TEXT PRIMARY KEY,
    scope_type TEXT NOT NULL,
    scope_key TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
INSERT OR IGNORE INTO config_scope (scope_id, scope_type, scope_key)
VALUES ('global', 'GLOBAL', 'global');

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL REFERENCES config_scope(scope_id),
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

-- ===== 人员与产品 =====
CREATE TABLE IF NOT EXISTS operators (
    operator_id TEXT PRIMARY KEY,
    company_id TEXT NOT NULL,
    name TEXT NOT NULL,
    roles TEXT NOT NULL,
    push_token TEXT
);
CREATE INDEX IF NOT EXISTS idx_operators_company ON operators(company_id);

CREATE TABLE IF NOT EXISTS products (
    product_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    active_ingredient TEXT,
    density REAL NOT NULL CHECK (density > 0)
);

-- ===== 订单 =====
CREATE TABLE IF NOT EXISTS orders (
    order_id TEXT PRIMARY KEY,
    lot_number TEXT NOT NULL,
    company_id TEXT NOT NULL,
    status TEXT NOT NULL,
    operator_id TEXT,
    tkw REAL,
    tkw_rep1 REAL,
    tkw_rep2 REAL,
    tkw_rep3 REAL,
    tkw_measured_at_ms INTEGER,
    seeds_to_treat_kg REAL NOT NULL,
    extra_slurry_percent REAL,
    packaging TEXT,
    bag_size REAL,
    tkw_measurement_interval_minutes INTEGER NOT NULL CHECK (tkw_measurement_interval_minutes >= 1),
    created_at_ms INTEGER NOT NULL,
    application_at_ms INTEGER,
    completed_at_ms INTEGER
);
CREATE INDEX IF NOT EXISTS idx_orders_company_status ON orders(company_id, status);

CREATE TABLE IF NOT EXISTS product_details (
    product_detail_id TEXT PRIMARY KEY,
    order_id TEXT NOT NULL REFERENCES orders(order_id) ON DELETE CASCADE,
    product_id TEXT NOT NULL REFERENCES products(product_id),
    idx INTEGER NOT NULL,
    rate REAL NOT NULL,
    rate_unit TEXT NOT NULL,
    rate_type TEXT NOT NULL,
    UNIQUE (order_id, idx)
);

-- ===== 配方 =====
CREATE TABLE IF NOT EXISTS order_recipes (
    recipe_id TEXT PRIMARY KEY,
    order_id TEXT NOT NULL UNIQUE REFERENCES orders(order_id) ON DELETE CASCADE,
    computed_at_ms INTEGER NOT NULL,
    unit_weight_kg REAL NOT NULL,
    total_compounds_density REAL NOT NULL,
    slurry_total_ml_per_unit REAL NOT NULL,
    slurry_total_g_per_unit REAL NOT NULL,
    slurry_total_ml_per_100kg REAL NOT NULL,
    slurry_total_g_per_100kg REAL NOT NULL,
    total_mix_volume_ml REAL NOT NULL,
    total_mix_mass_g REAL NOT NULL,
    extra_slurry_priming_ml REAL NOT NULL,
    nb_units REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS product_recipes (
    product_recipe_id TEXT PRIMARY KEY,
    recipe_id TEXT NOT NULL REFERENCES order_recipes(recipe_id) ON DELETE CASCADE,
    product_detail_id TEXT NOT NULL REFERENCES product_details(product_detail_id) ON DELETE CASCADE,
    product_name TEXT NOT NULL,
    idx INTEGER NOT NULL,
    ml_per_unit REAL NOT NULL,
    g_per_unit REAL NOT NULL,
    ml_per_100kg REAL NOT NULL,
    g_per_100kg REAL NOT NULL,
    mix_volume_ml REAL NOT NULL,
    mix_mass_g REAL NOT NULL
);

-- ===== 执行与测量 =====
CREATE TABLE IF NOT EXISTS measurement_sessions (
    session_id TEXT PRIMARY KEY,
    order_id TEXT NOT NULL UNIQUE REFERENCES orders(order_id) ON DELETE CASCADE,
    operator_id TEXT,
    preparation_started_at_ms INTEGER,
    treatment_started_at_ms INTEGER,
    treatment_finished_at_ms INTEGER,
    application_method TEXT,
    packed_seeds_to_treat_kg REAL,
    slurry_consumption_per_lot_kg REAL,
    current_page INTEGER,
    current_product_index INTEGER
);

CREATE TABLE IF NOT EXISTS product_executions (
    product_execution_id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES measurement_sessions(session_id) ON DELETE CASCADE,
    product_id TEXT NOT NULL REFERENCES products(product_id),
    applied_quantity REAL NOT NULL CHECK (applied_quantity >= 0),
    recorded_at_ms INTEGER NOT NULL,
    UNIQUE (session_id, product_id)
);

CREATE TABLE IF NOT EXISTS measurements (
    measurement_id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES measurement_sessions(session_id) ON DELETE CASCADE,
    created_at_ms INTEGER NOT NULL,
    probed_at_ms INTEGER,
    probe1 REAL,
    probe2 REAL,
    probe3 REAL,
    derived_tkw REAL
);
CREATE INDEX IF NOT EXISTS idx_measurements_session_created
    ON measurements(session_id, created_at_ms);
"#;

/// v1 → v2: 执行记录增加现场进度字段(product_executions 由建表语句创建)
const MIGRATE_V1_TO_V2_SQL: &str = r#"
ALTER TABLE measurement_sessions ADD COLUMN application_method TEXT;
ALTER TABLE measurement_sessions ADD COLUMN packed_seeds_to_treat_kg REAL;
ALTER TABLE measurement_sessions ADD COLUMN slurry_consumption_per_lot_kg REAL;
ALTER TABLE measurement_sessions ADD COLUMN current_page INTEGER;
ALTER TABLE measurement_sessions ADD COLUMN current_product_index INTEGER;
"#;

/// 幂等建表并记录 schema_version
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    if read_schema_version(conn)? == Some(1) {
        conn.execute_batch(MIGRATE_V1_TO_V2_SQL)?;
        tracing::info!(from = 1, to = CURRENT_SCHEMA_VERSION, "schema 已升级");
    }
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version(若表不存在则返回 None)
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
}

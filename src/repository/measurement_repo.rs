// ==========================================
// 种子包衣订单核心 - 执行记录与测量仓储
// ==========================================
// 职责: measurement_sessions / product_executions / measurements 的读写 + 调度器存储端口实现
// 红线: 测量创建为条件写入(订单状态新鲜读取 + 快照后无新测量),重复 tick 幂等
// 红线: 测量结果只能录入一次
// ==========================================

use crate::domain::measurement::{
    ArmedSession, ArmedSnapshot, ExecutionProgress, MalformedArmedRow, Measurement,
    MeasurementSession, PendingMeasurement, ProbeReading, ProductExecution,
};
use crate::domain::types::OrderStatus;
use crate::engine::measurement_scheduler::SchedulerStore;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

const MEASUREMENT_COLUMNS: &str =
    "m.measurement_id, m.session_id, m.created_at_ms, m.probed_at_ms, m.probe1, m.probe2, m.probe3, m.derived_tkw";

const SESSION_COLUMNS: &str = r#"
    session_id, order_id, operator_id, preparation_started_at_ms, treatment_started_at_ms,
    treatment_finished_at_ms, application_method, packed_seeds_to_treat_kg,
    slurry_consumption_per_lot_kg, current_page, current_product_index
"#;

const ARMED_SELECT: &str = r#"
    SELECT o.order_id, o.company_id, o.lot_number, s.session_id, o.status,
           o.tkw_measurement_interval_minutes, s.treatment_started_at_ms,
           (SELECT MAX(m.created_at_ms) FROM measurements m WHERE m.session_id = s.session_id)
    FROM orders o
    JOIN measurement_sessions s ON s.order_id = o.order_id
    WHERE s.treatment_started_at_ms IS NOT NULL
"#;

// ==========================================
// MeasurementRepository
// ==========================================
pub struct MeasurementRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MeasurementRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ===== 执行记录 =====

    /// 订单的执行记录
    pub fn find_session_by_order(&self, order_id: &str) -> RepositoryResult<Option<MeasurementSession>> {
        let conn = self.get_conn()?;
        find_session(&conn, order_id)
    }

    /// 标记备料开始(执行记录不存在时创建)
    pub fn mark_preparation_started(
        &self,
        order_id: &str,
        operator_id: Option<&str>,
        now_ms: i64,
    ) -> RepositoryResult<MeasurementSession> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            r#"
            INSERT INTO measurement_sessions (session_id, order_id, operator_id, preparation_started_at_ms)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(order_id) DO UPDATE SET
                preparation_started_at_ms = COALESCE(measurement_sessions.preparation_started_at_ms, excluded.preparation_started_at_ms),
                operator_id = COALESCE(measurement_sessions.operator_id, excluded.operator_id)
            "#,
            params![Uuid::new_v4().to_string(), order_id, operator_id, now_ms],
        )?;
        let session = find_session(&tx, order_id)?
            .ok_or_else(|| RepositoryError::not_found("MeasurementSession", order_id))?;
        tx.commit()?;
        Ok(session)
    }

    /// 标记包衣结束
    pub fn mark_treatment_finished(
        &self,
        order_id: &str,
        now_ms: i64,
    ) -> RepositoryResult<MeasurementSession> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE measurement_sessions
            SET treatment_finished_at_ms = COALESCE(treatment_finished_at_ms, ?1)
            WHERE order_id = ?2
            "#,
            params![now_ms, order_id],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("MeasurementSession", order_id));
        }
        find_session(&conn, order_id)?
            .ok_or_else(|| RepositoryError::not_found("MeasurementSession", order_id))
    }

    /// 保存现场执行进度(执行记录不存在时创建,None 字段保持原值)
    pub fn save_execution_progress(
        &self,
        order_id: &str,
        operator_id: Option<&str>,
        progress: &ExecutionProgress,
    ) -> RepositoryResult<MeasurementSession> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            r#"
            INSERT INTO measurement_sessions (
                session_id, order_id, operator_id, application_method, packed_seeds_to_treat_kg,
                slurry_consumption_per_lot_kg, current_page, current_product_index
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(order_id) DO UPDATE SET
                operator_id = COALESCE(measurement_sessions.operator_id, excluded.operator_id),
                application_method = COALESCE(excluded.application_method, measurement_sessions.application_method),
                packed_seeds_to_treat_kg = COALESCE(excluded.packed_seeds_to_treat_kg, measurement_sessions.packed_seeds_to_treat_kg),
                slurry_consumption_per_lot_kg = COALESCE(excluded.slurry_consumption_per_lot_kg, measurement_sessions.slurry_consumption_per_lot_kg),
                current_page = COALESCE(excluded.current_page, measurement_sessions.current_page),
                current_product_index = COALESCE(excluded.current_product_index, measurement_sessions.current_product_index)
            "#,
            params![
                Uuid::new_v4().to_string(),
                order_id,
                operator_id,
                progress.application_method,
                progress.packed_seeds_to_treat_kg,
                progress.slurry_consumption_per_lot_kg,
                progress.current_page,
                progress.current_product_index,
            ],
        )?;
        let session = find_session(&tx, order_id)?
            .ok_or_else(|| RepositoryError::not_found("MeasurementSession", order_id))?;
        tx.commit()?;
        Ok(session)
    }

    // ===== 产品施用量 =====

    /// 记录产品实际施用量(同一产品覆盖旧值)
    ///
    /// # 错误
    /// - NotFound: 订单尚无执行记录
    pub fn upsert_product_execution(
        &self,
        order_id: &str,
        product_id: &str,
        applied_quantity: f64,
        now_ms: i64,
    ) -> RepositoryResult<ProductExecution> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let session = find_session(&tx, order_id)?
            .ok_or_else(|| RepositoryError::not_found("MeasurementSession", order_id))?;

        tx.execute(
            r#"
            INSERT INTO product_executions (
                product_execution_id, session_id, product_id, applied_quantity, recorded_at_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(session_id, product_id) DO UPDATE SET
                applied_quantity = excluded.applied_quantity,
                recorded_at_ms = excluded.recorded_at_ms
            "#,
            params![
                Uuid::new_v4().to_string(),
                session.id,
                product_id,
                applied_quantity,
                now_ms,
            ],
        )?;
        let execution = tx.query_row(
            r#"
            SELECT product_execution_id, session_id, product_id, applied_quantity, recorded_at_ms
            FROM product_executions WHERE session_id = ?1 AND product_id = ?2
            "#,
            params![session.id, product_id],
            map_product_execution_row,
        )?;
        tx.commit()?;
        Ok(execution)
    }

    /// 订单的产品施用量(按记录时间升序)
    pub fn list_product_executions(&self, order_id: &str) -> RepositoryResult<Vec<ProductExecution>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT pe.product_execution_id, pe.session_id, pe.product_id, pe.applied_quantity, pe.recorded_at_ms
            FROM product_executions pe
            JOIN measurement_sessions s ON s.session_id = pe.session_id
            WHERE s.order_id = ?1
            ORDER BY pe.recorded_at_ms, pe.rowid
            "#,
        )?;
        let rows = stmt
            .query_map(params![order_id], map_product_execution_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ===== 测量 =====

    /// 按 ID 查询
    pub fn find_by_id(&self, measurement_id: &str) -> RepositoryResult<Option<Measurement>> {
        let conn = self.get_conn()?;
        let m = conn
            .query_row(
                &format!(
                    "SELECT {} FROM measurements m WHERE m.measurement_id = ?1",
                    MEASUREMENT_COLUMNS
                ),
                params![measurement_id],
                map_measurement_row,
            )
            .optional()?;
        Ok(m)
    }

    /// 测量所属订单 ID
    pub fn find_order_id(&self, measurement_id: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let order_id = conn
            .query_row(
                r#"
                SELECT s.order_id
                FROM measurements m
                JOIN measurement_sessions s ON s.session_id = m.session_id
                WHERE m.measurement_id = ?1
                "#,
                params![measurement_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(order_id)
    }

    /// 订单全部测量(按创建时间升序)
    pub fn list_by_order(&self, order_id: &str) -> RepositoryResult<Vec<Measurement>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM measurements m
            JOIN measurement_sessions s ON s.session_id = m.session_id
            WHERE s.order_id = ?1
            ORDER BY m.created_at_ms, m.rowid
            "#,
            MEASUREMENT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![order_id], map_measurement_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 订单最新一条测量
    pub fn latest_by_order(&self, order_id: &str) -> RepositoryResult<Option<Measurement>> {
        let conn = self.get_conn()?;
        let m = conn
            .query_row(
                &format!(
                    r#"
                    SELECT {} FROM measurements m
                    JOIN measurement_sessions s ON s.session_id = m.session_id
                    WHERE s.order_id = ?1
                    ORDER BY m.created_at_ms DESC, m.rowid DESC
                    LIMIT 1
                    "#,
                    MEASUREMENT_COLUMNS
                ),
                params![order_id],
                map_measurement_row,
            )
            .optional()?;
        Ok(m)
    }

    /// 订单中尚未录入结果的测量数
    pub fn count_unprobed_by_order(&self, order_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row(
            r#"
            SELECT COUNT(*) FROM measurements m
            JOIN measurement_sessions s ON s.session_id = m.session_id
            WHERE s.order_id = ?1 AND m.probed_at_ms IS NULL
            "#,
            params![order_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// 公司内待录入的测量(订单仍处于测量启用状态)
    pub fn list_pending_by_company(&self, company_id: &str) -> RepositoryResult<Vec<PendingMeasurement>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {}, o.order_id, o.lot_number
            FROM measurements m
            JOIN measurement_sessions s ON s.session_id = m.session_id
            JOIN orders o ON o.order_id = s.order_id
            WHERE o.company_id = ?1
              AND m.probed_at_ms IS NULL
              AND o.status IN (?2, ?3)
            ORDER BY m.created_at_ms
            "#,
            MEASUREMENT_COLUMNS
        ))?;
        let [active_a, active_b] = OrderStatus::MEASUREMENT_ACTIVE;
        let rows = stmt
            .query_map(
                params![company_id, active_a.to_db_str(), active_b.to_db_str()],
                |row| {
                    Ok(PendingMeasurement {
                        measurement: map_measurement_row(row)?,
                        order_id: row.get(8)?,
                        lot_number: row.get(9)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 录入测量结果(仅一次)
    ///
    /// # 错误
    /// - AlreadyRecorded: 已录入
    /// - NotFound: 测量不存在
    pub fn record_probe(
        &self,
        measurement_id: &str,
        reading: &ProbeReading,
        now_ms: i64,
    ) -> RepositoryResult<Measurement> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE measurements SET
                probed_at_ms = ?1, probe1 = ?2, probe2 = ?3, probe3 = ?4, derived_tkw = ?5
            WHERE measurement_id = ?6 AND probed_at_ms IS NULL
            "#,
            params![
                now_ms,
                reading.probes[0],
                reading.probes[1],
                reading.probes[2],
                reading.mean(),
                measurement_id,
            ],
        )?;

        let current = conn
            .query_row(
                &format!(
                    "SELECT {} FROM measurements m WHERE m.measurement_id = ?1",
                    MEASUREMENT_COLUMNS
                ),
                params![measurement_id],
                map_measurement_row,
            )
            .optional()?;

        match (affected, current) {
            (_, None) => Err(RepositoryError::not_found("Measurement", measurement_id)),
            (0, Some(_)) => Err(RepositoryError::AlreadyRecorded {
                measurement_id: measurement_id.to_string(),
            }),
            (_, Some(m)) => Ok(m),
        }
    }

    /// 逐行解码快照: 单行失败只记入 malformed,不影响其他订单
    fn query_armed(
        conn: &Connection,
        extra_filter: &str,
        statuses: &[OrderStatus],
        order_id: Option<&str>,
    ) -> RepositoryResult<ArmedSnapshot> {
        let mut snapshot = ArmedSnapshot::default();
        if statuses.is_empty() {
            return Ok(snapshot);
        }
        let placeholders = (1..=statuses.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "{} AND o.status IN ({}) {} ORDER BY o.created_at_ms",
            ARMED_SELECT, placeholders, extra_filter
        );

        let mut values: Vec<String> = statuses.iter().map(|s| s.to_db_str().to_string()).collect();
        if let Some(id) = order_id {
            values.push(id.to_string());
        }

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values.iter()))?;
        while let Some(row) = rows.next()? {
            match map_armed_row(row) {
                Ok(session) => snapshot.sessions.push(session),
                Err(e) => {
                    let order_id: String = row
                        .get(0)
                        .unwrap_or_else(|_| "<unknown>".to_string());
                    tracing::warn!(order_id = %order_id, error = %e, "调度快照行解码失败");
                    snapshot.malformed.push(MalformedArmedRow {
                        order_id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(snapshot)
    }
}

// ==========================================
// SchedulerStore 实现
// ==========================================
impl SchedulerStore for MeasurementRepository {
    fn find_armed_sessions(&self, statuses: &[OrderStatus]) -> RepositoryResult<ArmedSnapshot> {
        let conn = self.get_conn()?;
        Self::query_armed(&conn, "", statuses, None)
    }

    fn find_armed_session_for_order(&self, order_id: &str) -> RepositoryResult<Option<ArmedSession>> {
        let conn = self.get_conn()?;
        let statuses = OrderStatus::MEASUREMENT_ACTIVE;
        let filter = format!("AND o.order_id = ?{}", statuses.len() + 1);
        let mut snapshot = Self::query_armed(&conn, &filter, &statuses, Some(order_id))?;
        if let Some(bad) = snapshot.malformed.pop() {
            return Err(RepositoryError::field("orders", bad.reason));
        }
        Ok(snapshot.sessions.pop())
    }

    fn create_measurement_if_due(
        &self,
        snapshot: &ArmedSession,
        now_ms: i64,
    ) -> RepositoryResult<Option<Measurement>> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        // 新鲜读取订单状态(不信任快照)
        let fresh_status: Option<String> = tx
            .query_row(
                r#"
                SELECT o.status FROM orders o
                JOIN measurement_sessions s ON s.order_id = o.order_id
                WHERE o.order_id = ?1 AND s.session_id = ?2 AND s.treatment_started_at_ms IS NOT NULL
                "#,
                params![snapshot.order_id, snapshot.session_id],
                |row| row.get(0),
            )
            .optional()?;
        let still_active = fresh_status
            .as_deref()
            .and_then(OrderStatus::from_db_str)
            .map(|s| s.is_measurement_active())
            .unwrap_or(false);
        if !still_active {
            return Ok(None);
        }

        // 快照之后已有新测量: 另一轮 tick 已处理
        let latest: Option<i64> = tx.query_row(
            "SELECT MAX(created_at_ms) FROM measurements WHERE session_id = ?1",
            params![snapshot.session_id],
            |row| row.get(0),
        )?;
        if latest != snapshot.last_measurement_at_ms {
            return Ok(None);
        }

        let measurement = Measurement {
            id: Uuid::new_v4().to_string(),
            session_id: snapshot.session_id.clone(),
            created_at_ms: now_ms,
            probed_at_ms: None,
            probes: [None; 3],
            derived_tkw: None,
        };
        tx.execute(
            "INSERT INTO measurements (measurement_id, session_id, created_at_ms) VALUES (?1, ?2, ?3)",
            params![measurement.id, measurement.session_id, measurement.created_at_ms],
        )?;
        tx.commit()?;

        Ok(Some(measurement))
    }
}

// ==========================================
// 行映射
// ==========================================

fn find_session(conn: &Connection, order_id: &str) -> RepositoryResult<Option<MeasurementSession>> {
    let session = conn
        .query_row(
            &format!(
                "SELECT {} FROM measurement_sessions WHERE order_id = ?1",
                SESSION_COLUMNS
            ),
            params![order_id],
            |row| {
                Ok(MeasurementSession {
                    id: row.get(0)?,
                    order_id: row.get(1)?,
                    operator_id: row.get(2)?,
                    preparation_started_at_ms: row.get(3)?,
                    treatment_started_at_ms: row.get(4)?,
                    treatment_finished_at_ms: row.get(5)?,
                    progress: ExecutionProgress {
                        application_method: row.get(6)?,
                        packed_seeds_to_treat_kg: row.get(7)?,
                        slurry_consumption_per_lot_kg: row.get(8)?,
                        current_page: row.get(9)?,
                        current_product_index: row.get(10)?,
                    },
                })
            },
        )
        .optional()?;
    Ok(session)
}

fn map_product_execution_row(row: &rusqlite::Row) -> rusqlite::Result<ProductExecution> {
    Ok(ProductExecution {
        id: row.get(0)?,
        session_id: row.get(1)?,
        product_id: row.get(2)?,
        applied_quantity: row.get(3)?,
        recorded_at_ms: row.get(4)?,
    })
}

fn map_measurement_row(row: &rusqlite::Row) -> rusqlite::Result<Measurement> {
    Ok(Measurement {
        id: row.get(0)?,
        session_id: row.get(1)?,
        created_at_ms: row.get(2)?,
        probed_at_ms: row.get(3)?,
        probes: [row.get(4)?, row.get(5)?, row.get(6)?],
        derived_tkw: row.get(7)?,
    })
}

fn map_armed_row(row: &rusqlite::Row) -> rusqlite::Result<ArmedSession> {
    let raw_status: String = row.get(4)?;
    let status = OrderStatus::from_db_str(&raw_status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Text,
            Box::new(RepositoryError::field("status", format!("无法识别的代码: {}", raw_status))),
        )
    })?;
    Ok(ArmedSession {
        order_id: row.get(0)?,
        company_id: row.get(1)?,
        lot_number: row.get(2)?,
        session_id: row.get(3)?,
        status,
        interval_minutes: row.get(5)?,
        treatment_started_at_ms: row.get(6)?,
        last_measurement_at_ms: row.get(7)?,
    })
}

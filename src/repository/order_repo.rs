// ==========================================
// 种子包衣订单核心 - 订单仓储
// ==========================================
// 职责: 订单聚合(orders + product_details)的读写,以及状态转换计划落库
// 红线: Repository 不含业务逻辑;转换合法性由状态机判定
// 红线: apply_transition 在单个事务内完成,按原状态做 compare-and-set
// ==========================================

use crate::domain::order::{Order, Product, ProductDetail};
use crate::domain::recipe::OrderRecipe;
use crate::domain::types::{OrderStatus, Packaging, RateType, RateUnit};
use crate::engine::order_state::{SessionArming, TransitionPlan};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::recipe_repo::write_recipe;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

const ORDER_COLUMNS: &str = r#"
    order_id, lot_number, company_id, status, operator_id,
    tkw, tkw_rep1, tkw_rep2, tkw_rep3, tkw_measured_at_ms,
    seeds_to_treat_kg, extra_slurry_percent, packaging, bag_size,
    tkw_measurement_interval_minutes, created_at_ms, application_at_ms, completed_at_ms
"#;

// ==========================================
// OrderRepository - 订单仓储
// ==========================================
pub struct OrderRepository {
    conn: Arc<Mutex<Connection>>,
}

impl OrderRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 新建订单(含产品行),可同时写入初始配方
    pub fn insert(&self, order: &Order, recipe: Option<&OrderRecipe>) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            &format!(
                "INSERT INTO orders ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                ORDER_COLUMNS
            ),
            params![
                order.id,
                order.lot_number,
                order.company_id,
                order.status.to_db_str(),
                order.operator_id,
                order.tkw,
                order.tkw_reps[0],
                order.tkw_reps[1],
                order.tkw_reps[2],
                order.tkw_measured_at_ms,
                order.seeds_to_treat_kg,
                order.extra_slurry_percent,
                order.packaging.map(|p| p.to_db_str()),
                order.bag_size,
                order.tkw_measurement_interval_minutes,
                order.created_at_ms,
                order.application_at_ms,
                order.completed_at_ms,
            ],
        )?;

        insert_product_details(&tx, order)?;

        if let Some(recipe) = recipe {
            write_recipe(&tx, &order.id, recipe, order.created_at_ms)?;
        }

        tx.commit()?;
        tracing::info!(
            order_id = %order.id,
            status = %order.status,
            products = order.product_details.len(),
            with_recipe = recipe.is_some(),
            "订单已创建"
        );
        Ok(())
    }

    /// 按 ID 查询(含产品行)
    pub fn find_by_id(&self, order_id: &str) -> RepositoryResult<Option<Order>> {
        let conn = self.get_conn()?;
        let order = conn
            .query_row(
                &format!("SELECT {} FROM orders WHERE order_id = ?1", ORDER_COLUMNS),
                params![order_id],
                map_order_row,
            )
            .optional()?;

        match order {
            Some(mut order) => {
                order.product_details = load_product_details(&conn, &order.id)?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }

    /// 公司订单列表(按创建时间倒序)
    pub fn list_by_company(
        &self,
        company_id: &str,
        include_archived: bool,
    ) -> RepositoryResult<Vec<Order>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM orders
            WHERE company_id = ?1 AND (?2 OR status <> 'ARCHIVED')
            ORDER BY created_at_ms DESC
            "#,
            ORDER_COLUMNS
        ))?;
        let mut orders = stmt
            .query_map(params![company_id, include_archived], map_order_row)?
            .collect::<Result<Vec<_>, _>>()?;

        for order in &mut orders {
            order.product_details = load_product_details(&conn, &order.id)?;
        }
        Ok(orders)
    }

    /// 删除订单(产品行、配方、执行记录、测量级联删除)
    pub fn delete(&self, order_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute("DELETE FROM orders WHERE order_id = ?1", params![order_id])?;
        if affected == 0 {
            return Err(RepositoryError::not_found("Order", order_id));
        }
        tracing::info!(order_id, "订单已删除");
        Ok(())
    }

    /// 在单个事务内落库状态转换计划
    ///
    /// # 错误
    /// - NotFound: 订单不存在
    /// - StatusConflict: 订单状态已不是 plan.from(并发修改)
    pub fn apply_transition(&self, plan: &TransitionPlan) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        // === 步骤 1: 状态 CAS + 时间戳 + 首次绑定执行人 ===
        let affected = tx.execute(
            r#"
            UPDATE orders SET
                status = ?1,
                operator_id = COALESCE(operator_id, ?2),
                application_at_ms = COALESCE(?3, application_at_ms),
                completed_at_ms = COALESCE(?4, completed_at_ms)
            WHERE order_id = ?5 AND status = ?6
            "#,
            params![
                plan.to.to_db_str(),
                plan.bind_operator,
                plan.application_at_ms,
                plan.completed_at_ms,
                plan.order_id,
                plan.from.to_db_str(),
            ],
        )?;
        if affected == 0 {
            return Err(status_conflict(&tx, &plan.order_id, plan.from)?);
        }

        // === 步骤 2: 实验室 TKW ===
        if let Some(update) = &plan.tkw_update {
            tx.execute(
                r#"
                UPDATE orders SET
                    tkw = ?1, tkw_rep1 = ?2, tkw_rep2 = ?3, tkw_rep3 = ?4, tkw_measured_at_ms = ?5
                WHERE order_id = ?6
                "#,
                params![
                    update.tkw,
                    update.reps[0],
                    update.reps[1],
                    update.reps[2],
                    update.measured_at_ms,
                    plan.order_id,
                ],
            )?;
        }

        // === 步骤 3: 启用定时测量 ===
        match &plan.arming {
            Some(SessionArming::Create {
                session_id,
                operator_id,
                treatment_started_at_ms,
            }) => {
                tx.execute(
                    r#"
                    INSERT INTO measurement_sessions (session_id, order_id, operator_id, treatment_started_at_ms)
                    VALUES (?1, ?2, ?3, ?4)
                    "#,
                    params![session_id, plan.order_id, operator_id, treatment_started_at_ms],
                )?;
            }
            Some(SessionArming::StampStart {
                session_id,
                treatment_started_at_ms,
            }) => {
                tx.execute(
                    r#"
                    UPDATE measurement_sessions SET
                        treatment_started_at_ms = COALESCE(treatment_started_at_ms, ?1),
                        operator_id = COALESCE(operator_id, ?2)
                    WHERE session_id = ?3
                    "#,
                    params![treatment_started_at_ms, plan.bind_operator, session_id],
                )?;
            }
            None => {}
        }

        // === 步骤 4: 配方整体替换 ===
        if let Some(recipe) = &plan.recipe {
            write_recipe(&tx, &plan.order_id, recipe, plan.planned_at_ms)?;
        }

        tx.commit()?;
        tracing::info!(
            order_id = %plan.order_id,
            from = %plan.from,
            to = %plan.to,
            "状态转换已落库"
        );
        Ok(())
    }

    /// 订单定稿: 在原状态仍为 `expected` 时整体替换配方输入
    ///
    /// 订单字段、产品行、目标状态与(可选)新配方在同一事务内落库
    ///
    /// # 错误
    /// - NotFound: 订单不存在
    /// - StatusConflict: 订单状态已不是 expected
    pub fn finalize(
        &self,
        order: &Order,
        expected: OrderStatus,
        recipe: Option<&OrderRecipe>,
        computed_at_ms: i64,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let affected = tx.execute(
            r#"
            UPDATE orders SET
                status = ?1,
                operator_id = ?2,
                tkw = ?3,
                tkw_measured_at_ms = ?4,
                seeds_to_treat_kg = ?5,
                extra_slurry_percent = ?6,
                packaging = ?7,
                bag_size = ?8,
                tkw_measurement_interval_minutes = ?9
            WHERE order_id = ?10 AND status = ?11
            "#,
            params![
                order.status.to_db_str(),
                order.operator_id,
                order.tkw,
                order.tkw_measured_at_ms,
                order.seeds_to_treat_kg,
                order.extra_slurry_percent,
                order.packaging.map(|p| p.to_db_str()),
                order.bag_size,
                order.tkw_measurement_interval_minutes,
                order.id,
                expected.to_db_str(),
            ],
        )?;
        if affected == 0 {
            return Err(status_conflict(&tx, &order.id, expected)?);
        }

        // 旧产品行删除时其配方行级联删除
        tx.execute("DELETE FROM product_details WHERE order_id = ?1", params![order.id])?;
        insert_product_details(&tx, order)?;

        if let Some(recipe) = recipe {
            write_recipe(&tx, &order.id, recipe, computed_at_ms)?;
        }

        tx.commit()?;
        tracing::info!(
            order_id = %order.id,
            from = %expected,
            to = %order.status,
            products = order.product_details.len(),
            with_recipe = recipe.is_some(),
            "订单已定稿"
        );
        Ok(())
    }
}

// ==========================================
// 事务内辅助函数
// ==========================================

fn insert_product_details(conn: &Connection, order: &Order) -> RepositoryResult<()> {
    let mut stmt = conn.prepare(
        r#"
        INSERT INTO product_details (
            product_detail_id, order_id, product_id, idx, rate, rate_unit, rate_type
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )?;
    for d in &order.product_details {
        stmt.execute(params![
            d.id,
            order.id,
            d.product.id,
            d.index,
            d.rate,
            d.rate_unit.code(),
            d.rate_type.code(),
        ])?;
    }
    Ok(())
}

/// CAS 未命中时区分"订单不存在"与"状态已变化"
fn status_conflict(
    conn: &Connection,
    order_id: &str,
    expected: OrderStatus,
) -> RepositoryResult<RepositoryError> {
    let actual: Option<String> = conn
        .query_row(
            "SELECT status FROM orders WHERE order_id = ?1",
            params![order_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(match actual {
        None => RepositoryError::not_found("Order", order_id),
        Some(actual) => RepositoryError::StatusConflict {
            order_id: order_id.to_string(),
            expected: expected.to_db_str().to_string(),
            actual,
        },
    })
}

// ==========================================
// 行映射
// ==========================================

fn conversion_error(idx: usize, field: &str, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(RepositoryError::field(field, format!("无法识别的代码: {}", raw))),
    )
}

fn map_order_row(row: &rusqlite::Row) -> rusqlite::Result<Order> {
    let raw_status: String = row.get(3)?;
    let status =
        OrderStatus::from_db_str(&raw_status).ok_or_else(|| conversion_error(3, "status", &raw_status))?;
    let packaging = match row.get::<_, Option<String>>(12)? {
        Some(raw) => Some(Packaging::from_db_str(&raw).ok_or_else(|| conversion_error(12, "packaging", &raw))?),
        None => None,
    };

    Ok(Order {
        id: row.get(0)?,
        lot_number: row.get(1)?,
        company_id: row.get(2)?,
        status,
        operator_id: row.get(4)?,
        tkw: row.get(5)?,
        tkw_reps: [row.get(6)?, row.get(7)?, row.get(8)?],
        tkw_measured_at_ms: row.get(9)?,
        seeds_to_treat_kg: row.get(10)?,
        extra_slurry_percent: row.get(11)?,
        packaging,
        bag_size: row.get(13)?,
        tkw_measurement_interval_minutes: row.get(14)?,
        created_at_ms: row.get(15)?,
        application_at_ms: row.get(16)?,
        completed_at_ms: row.get(17)?,
        product_details: Vec::new(),
    })
}

fn load_product_details(conn: &Connection, order_id: &str) -> RepositoryResult<Vec<ProductDetail>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT pd.product_detail_id, pd.idx, pd.rate, pd.rate_unit, pd.rate_type,
               p.product_id, p.name, p.active_ingredient, p.density
        FROM product_details pd
        JOIN products p ON p.product_id = pd.product_id
        WHERE pd.order_id = ?1
        ORDER BY pd.idx
        "#,
    )?;
    let details = stmt
        .query_map(params![order_id], |row| {
            let raw_unit: String = row.get(3)?;
            let raw_type: String = row.get(4)?;
            Ok(ProductDetail {
                id: row.get(0)?,
                index: row.get(1)?,
                rate: row.get(2)?,
                rate_unit: RateUnit::from_code(&raw_unit)
                    .ok_or_else(|| conversion_error(3, "rate_unit", &raw_unit))?,
                rate_type: RateType::from_code(&raw_type)
                    .ok_or_else(|| conversion_error(4, "rate_type", &raw_type))?,
                product: Product {
                    id: row.get(5)?,
                    name: row.get(6)?,
                    active_ingredient: row.get(7)?,
                    density: row.get(8)?,
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(details)
}

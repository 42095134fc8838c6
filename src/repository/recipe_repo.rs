// ==========================================
// 种子包衣订单核心 - 配方仓储
// ==========================================
// 职责: order_recipes / product_recipes 的整体替换与读取
// 红线: 每个订单至多一份配方;替换 = 删除旧配方 + 写入新配方(同一事务)
// ==========================================

use crate::domain::recipe::{ConvertedRates, OrderRecipe, ProductRecipe, StoredOrderRecipe};
use crate::domain::types::OrderStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// 配方仓储
pub struct RecipeRepository {
    conn: Arc<Mutex<Connection>>,
}

impl RecipeRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取订单当前配方
    pub fn find_by_order(&self, order_id: &str) -> RepositoryResult<Option<StoredOrderRecipe>> {
        let conn = self.get_conn()?;
        load_recipe(&conn, order_id)
    }

    /// 在订单状态仍为 `expected_status` 时整体替换配方
    ///
    /// # 返回
    /// - Ok(StoredOrderRecipe): 新配方
    /// - Err(StatusConflict): 订单状态已变化
    pub fn replace_for_order(
        &self,
        order_id: &str,
        expected_status: OrderStatus,
        recipe: &OrderRecipe,
        computed_at_ms: i64,
    ) -> RepositoryResult<StoredOrderRecipe> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let actual: Option<String> = tx
            .query_row(
                "SELECT status FROM orders WHERE order_id = ?1",
                params![order_id],
                |row| row.get(0),
            )
            .optional()?;
        let actual = actual.ok_or_else(|| RepositoryError::not_found("Order", order_id))?;
        if actual != expected_status.to_db_str() {
            return Err(RepositoryError::StatusConflict {
                order_id: order_id.to_string(),
                expected: expected_status.to_db_str().to_string(),
                actual,
            });
        }

        let recipe_id = write_recipe(&tx, order_id, recipe, computed_at_ms)?;
        tx.commit()?;

        tracing::info!(order_id, recipe_id = %recipe_id, "配方已替换");
        Ok(StoredOrderRecipe {
            recipe_id,
            computed_at_ms,
            recipe: recipe.clone(),
        })
    }
}

// ==========================================
// 事务内辅助函数(供 OrderRepository 复用)
// ==========================================

/// 删除旧配方并写入新配方,返回新配方 ID
pub(crate) fn write_recipe(
    conn: &Connection,
    order_id: &str,
    recipe: &OrderRecipe,
    computed_at_ms: i64,
) -> RepositoryResult<String> {
    // product_recipes 随 order_recipes 级联删除
    conn.execute("DELETE FROM order_recipes WHERE order_id = ?1", params![order_id])?;

    let recipe_id = Uuid::new_v4().to_string();
    conn.execute(
        r#"
        INSERT INTO order_recipes (
            recipe_id, order_id, computed_at_ms,
            unit_weight_kg, total_compounds_density,
            slurry_total_ml_per_unit, slurry_total_g_per_unit,
            slurry_total_ml_per_100kg, slurry_total_g_per_100kg,
            total_mix_volume_ml, total_mix_mass_g,
            extra_slurry_priming_ml, nb_units
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
        params![
            recipe_id,
            order_id,
            computed_at_ms,
            recipe.unit_weight_kg,
            recipe.total_compounds_density,
            recipe.slurry_total_ml_per_unit,
            recipe.slurry_total_g_per_unit,
            recipe.slurry_total_ml_per_100kg,
            recipe.slurry_total_g_per_100kg,
            recipe.total_mix_volume_ml,
            recipe.total_mix_mass_g,
            recipe.extra_slurry_priming_ml,
            recipe.nb_units,
        ],
    )?;

    let mut stmt = conn.prepare(
        r#"
        INSERT INTO product_recipes (
            product_recipe_id, recipe_id, product_detail_id, product_name, idx,
            ml_per_unit, g_per_unit, ml_per_100kg, g_per_100kg,
            mix_volume_ml, mix_mass_g
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )?;
    for p in &recipe.product_recipes {
        stmt.execute(params![
            Uuid::new_v4().to_string(),
            recipe_id,
            p.product_detail_id,
            p.product_name,
            p.index,
            p.rates.ml_per_unit,
            p.rates.g_per_unit,
            p.rates.ml_per_100kg,
            p.rates.g_per_100kg,
            p.mix_volume_ml,
            p.mix_mass_g,
        ])?;
    }

    Ok(recipe_id)
}

pub(crate) fn load_recipe(
    conn: &Connection,
    order_id: &str,
) -> RepositoryResult<Option<StoredOrderRecipe>> {
    let header = conn
        .query_row(
            r#"
            SELECT recipe_id, computed_at_ms,
                   unit_weight_kg, total_compounds_density,
                   slurry_total_ml_per_unit, slurry_total_g_per_unit,
                   slurry_total_ml_per_100kg, slurry_total_g_per_100kg,
                   total_mix_volume_ml, total_mix_mass_g,
                   extra_slurry_priming_ml, nb_units
            FROM order_recipes
            WHERE order_id = ?1
            "#,
            params![order_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    OrderRecipe {
                        order_id: order_id.to_string(),
                        unit_weight_kg: row.get(2)?,
                        total_compounds_density: row.get(3)?,
                        slurry_total_ml_per_unit: row.get(4)?,
                        slurry_total_g_per_unit: row.get(5)?,
                        slurry_total_ml_per_100kg: row.get(6)?,
                        slurry_total_g_per_100kg: row.get(7)?,
                        total_mix_volume_ml: row.get(8)?,
                        total_mix_mass_g: row.get(9)?,
                        extra_slurry_priming_ml: row.get(10)?,
                        nb_units: row.get(11)?,
                        product_recipes: Vec::new(),
                    },
                ))
            },
        )
        .optional()?;

    let Some((recipe_id, computed_at_ms, mut recipe)) = header else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        r#"
        SELECT product_detail_id, product_name, idx,
               ml_per_unit, g_per_unit, ml_per_100kg, g_per_100kg,
               mix_volume_ml, mix_mass_g
        FROM product_recipes
        WHERE recipe_id = ?1
        ORDER BY idx
        "#,
    )?;
    recipe.product_recipes = stmt
        .query_map(params![recipe_id], |row| {
            Ok(ProductRecipe {
                product_detail_id: row.get(0)?,
                product_name: row.get(1)?,
                index: row.get(2)?,
                rates: ConvertedRates {
                    ml_per_unit: row.get(3)?,
                    g_per_unit: row.get(4)?,
                    ml_per_100kg: row.get(5)?,
                    g_per_100kg: row.get(6)?,
                },
                mix_volume_ml: row.get(7)?,
                mix_mass_g: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(StoredOrderRecipe {
        recipe_id,
        computed_at_ms,
        recipe,
    }))
}

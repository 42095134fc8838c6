// ==========================================
// 种子包衣订单核心 - 产品(药剂)仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================

use crate::domain::order::Product;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

/// 产品仓储
/// 职责: 管理 products 表
pub struct ProductRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ProductRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 新增或更新产品
    pub fn upsert(&self, product: &Product) -> RepositoryResult<()> {
        if !product.density.is_finite() || product.density <= 0.0 {
            return Err(RepositoryError::field(
                "density",
                format!("密度必须为正数: {}", product.density),
            ));
        }
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO products (product_id, name, active_ingredient, density)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(product_id) DO UPDATE SET
                name = excluded.name,
                active_ingredient = excluded.active_ingredient,
                density = excluded.density
            "#,
            params![
                product.id,
                product.name,
                product.active_ingredient,
                product.density
            ],
        )?;
        Ok(())
    }

    /// 按 ID 查询
    pub fn find_by_id(&self, product_id: &str) -> RepositoryResult<Option<Product>> {
        let conn = self.get_conn()?;
        let product = conn
            .query_row(
                "SELECT product_id, name, active_ingredient, density FROM products WHERE product_id = ?1",
                params![product_id],
                map_product_row,
            )
            .optional()?;
        Ok(product)
    }

    /// 全部产品(按名称排序)
    pub fn list_all(&self) -> RepositoryResult<Vec<Product>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT product_id, name, active_ingredient, density FROM products ORDER BY name",
        )?;
        let products = stmt
            .query_map([], map_product_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(products)
    }
}

fn map_product_row(row: &rusqlite::Row) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        active_ingredient: row.get(2)?,
        density: row.get(3)?,
    })
}

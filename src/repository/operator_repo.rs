// ==========================================
// 种子包衣订单核心 - 人员仓储
// ==========================================
// 职责: 管理 operators 表(角色 + 推送令牌)
// 存储: roles 以逗号分隔的大写代码保存
// ==========================================

use crate::domain::operator::{Operator, Role};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

/// 人员仓储
pub struct OperatorRepository {
    conn: Arc<Mutex<Connection>>,
}

impl OperatorRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 新增或更新人员
    pub fn upsert(&self, operator: &Operator) -> RepositoryResult<()> {
        let roles = operator
            .roles
            .iter()
            .map(Role::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO operators (operator_id, company_id, name, roles, push_token)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(operator_id) DO UPDATE SET
                company_id = excluded.company_id,
                name = excluded.name,
                roles = excluded.roles,
                push_token = excluded.push_token
            "#,
            params![
                operator.id,
                operator.company_id,
                operator.name,
                roles,
                operator.push_token
            ],
        )?;
        Ok(())
    }

    /// 按 ID 查询
    pub fn find_by_id(&self, operator_id: &str) -> RepositoryResult<Option<Operator>> {
        let conn = self.get_conn()?;
        let op = conn
            .query_row(
                "SELECT operator_id, company_id, name, roles, push_token FROM operators WHERE operator_id = ?1",
                params![operator_id],
                map_operator_row,
            )
            .optional()?;
        Ok(op)
    }

    /// 公司内全部人员
    pub fn list_by_company(&self, company_id: &str) -> RepositoryResult<Vec<Operator>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT operator_id, company_id, name, roles, push_token
            FROM operators
            WHERE company_id = ?1
            ORDER BY name
            "#,
        )?;
        let ops = stmt
            .query_map(params![company_id], map_operator_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ops)
    }
}

fn map_operator_row(row: &rusqlite::Row) -> rusqlite::Result<Operator> {
    let raw_roles: String = row.get(3)?;
    Ok(Operator {
        id: row.get(0)?,
        company_id: row.get(1)?,
        name: row.get(2)?,
        // 未知角色代码直接忽略
        roles: raw_roles.split(',').filter_map(Role::from_str).collect(),
        push_token: row.get(4)?,
    })
}

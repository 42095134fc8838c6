// ==========================================
// 种子包衣订单核心 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// 说明: 值缺失或格式错误时回落到默认值并告警,不中断业务
// ==========================================

use crate::db::open_sqlite_connection;
use crate::engine::notifier::DEFAULT_DEEP_LINK_BASE;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

/// 全局作用域
pub const GLOBAL_SCOPE: &str = "global";

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 按数据库路径创建
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建(重复应用统一 PRAGMA,幂等)
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            crate::db::configure_sqlite_connection(&guard)?;
        }
        Ok(Self { conn })
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
                params![GLOBAL_SCOPE, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值(UPSERT)
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at) VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![GLOBAL_SCOPE, key, value],
        )?;
        tracing::info!(key, value, "配置已更新");
        Ok(())
    }

    /// 所有 global 配置的 JSON 快照(按键排序)
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![GLOBAL_SCOPE], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut map = BTreeMap::new();
        for row in rows {
            let (k, v) = row?;
            map.insert(k, v);
        }
        serde_json::to_string(&map)
            .map_err(|e| RepositoryError::InternalError(format!("配置快照序列化失败: {}", e)))
    }

    /// 读取并解析配置;缺失或解析失败时返回默认值
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> RepositoryResult<T>
    where
        T: FromStr + Copy + std::fmt::Display,
    {
        let Some(raw) = self.get_global_config_value(key)? else {
            return Ok(default);
        };
        match raw.trim().parse::<T>() {
            Ok(v) => Ok(v),
            Err(_) => {
                tracing::warn!(config_key = key, raw_value = %raw, default = %default, "配置格式错误,使用默认值");
                Ok(default)
            }
        }
    }

    // ===== 调度 =====

    /// 调度器 tick 间隔(毫秒)
    pub fn get_scheduler_tick_interval_ms(&self) -> RepositoryResult<u64> {
        let v = self.get_parsed_or_default(config_keys::SCHEDULER_TICK_INTERVAL_MS, defaults::SCHEDULER_TICK_INTERVAL_MS)?;
        Ok(v.max(1))
    }

    /// 新订单默认 TKW 测量间隔(分钟)
    pub fn get_default_tkw_measurement_interval_minutes(&self) -> RepositoryResult<u32> {
        let v = self.get_parsed_or_default(
            config_keys::DEFAULT_TKW_MEASUREMENT_INTERVAL_MINUTES,
            defaults::TKW_MEASUREMENT_INTERVAL_MINUTES,
        )?;
        Ok(v.max(1))
    }

    // ===== 通知 =====

    /// 通知队列容量
    pub fn get_notification_queue_capacity(&self) -> RepositoryResult<usize> {
        let v = self.get_parsed_or_default(config_keys::NOTIFICATION_QUEUE_CAPACITY, defaults::NOTIFICATION_QUEUE_CAPACITY)?;
        Ok(v.max(1))
    }

    /// 深链前缀
    pub fn get_deep_link_base(&self) -> RepositoryResult<String> {
        Ok(self
            .get_global_config_value(config_keys::DEEP_LINK_BASE)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_DEEP_LINK_BASE.to_string()))
    }

    // ===== 流程 =====

    /// 是否启用实验室 TKW 流程
    pub fn is_lab_workflow_enabled(&self) -> RepositoryResult<bool> {
        let Some(raw) = self.get_global_config_value(config_keys::LAB_WORKFLOW_ENABLED)? else {
            return Ok(defaults::LAB_WORKFLOW_ENABLED);
        };
        Ok(match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                tracing::warn!(raw_value = %raw, "lab_workflow_enabled 格式错误,使用默认值");
                defaults::LAB_WORKFLOW_ENABLED
            }
        })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 调度
    pub const SCHEDULER_TICK_INTERVAL_MS: &str = "scheduler_tick_interval_ms";
    pub const DEFAULT_TKW_MEASUREMENT_INTERVAL_MINUTES: &str =
        "default_tkw_measurement_interval_minutes";

    // 通知
    pub const NOTIFICATION_QUEUE_CAPACITY: &str = "notification_queue_capacity";
    pub const DEEP_LINK_BASE: &str = "deep_link_base";

    // 流程
    pub const LAB_WORKFLOW_ENABLED: &str = "lab_workflow_enabled";
}

/// 默认值
pub mod defaults {
    use crate::domain::order::DEFAULT_TKW_MEASUREMENT_INTERVAL_MINUTES;

    pub const SCHEDULER_TICK_INTERVAL_MS: u64 = 60_000;
    pub const TKW_MEASUREMENT_INTERVAL_MINUTES: u32 = DEFAULT_TKW_MEASUREMENT_INTERVAL_MINUTES;
    pub const NOTIFICATION_QUEUE_CAPACITY: usize = 256;
    pub const LAB_WORKFLOW_ENABLED: bool = true;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::ensure_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_defaults_when_missing() {
        let cm = manager();
        assert_eq!(cm.get_scheduler_tick_interval_ms().unwrap(), 60_000);
        assert_eq!(cm.get_default_tkw_measurement_interval_minutes().unwrap(), 60);
        assert_eq!(cm.get_notification_queue_capacity().unwrap(), 256);
        assert!(cm.is_lab_workflow_enabled().unwrap());
        assert_eq!(cm.get_deep_link_base().unwrap(), "seedtreat://");
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let cm = manager();
        cm.set_global_config_value(config_keys::SCHEDULER_TICK_INTERVAL_MS, "5000").unwrap();
        cm.set_global_config_value(config_keys::LAB_WORKFLOW_ENABLED, "off").unwrap();
        cm.set_global_config_value(config_keys::NOTIFICATION_QUEUE_CAPACITY, "lots").unwrap();

        assert_eq!(cm.get_scheduler_tick_interval_ms().unwrap(), 5000);
        assert!(!cm.is_lab_workflow_enabled().unwrap());
        assert_eq!(cm.get_notification_queue_capacity().unwrap(), 256);

        let snapshot: BTreeMap<String, String> =
            serde_json::from_str(&cm.get_config_snapshot().unwrap()).unwrap();
        assert_eq!(snapshot.get("scheduler_tick_interval_ms").map(String::as_str), Some("5000"));
    }
}

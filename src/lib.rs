// ==========================================
// 种子包衣订单核心 - 核心库
// ==========================================
// 范围: 订单状态机 / 配方与浆料计算 / TKW 定时测量 / 通知与存储端口
// 技术栈: Rust + SQLite + tokio
// ==========================================

// 初始化国际化系统
rust_i18n::i18n!("locales", fallback = "en");

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// SQL/耗时观测
pub mod perf;

// 国际化
pub mod i18n;

// 通知投递 - 队列与推送
pub mod notification;

// API 层 - 业务接口
pub mod api;

// 应用层 - 组装与守护任务
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{OrderStatus, Packaging, RateType, RateUnit};

// 领域实体
pub use domain::{
    Measurement, MeasurementSession, NewOrder, NewProductDetail, Operator, Order, OrderRecipe,
    OrderUpdate, Product, ProductDetail, ProductRecipe, ProbeReading, Role,
};

// 引擎
pub use engine::{
    Clock, EngineError, MeasurementScheduler, Notification, Notifier, OrderStateMachine,
    RateConverter, RecipeEngine, SystemClock,
};

// API
pub use api::{ApiError, MeasurementApi, OrderApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "种子包衣订单核心";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}

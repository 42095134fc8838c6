// ==========================================
// 种子包衣订单核心 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod measurement;
pub mod operator;
pub mod order;
pub mod recipe;
pub mod types;

// 重导出核心类型
pub use measurement::{
    ArmedSession, ArmedSnapshot, ExecutionProgress, MalformedArmedRow, Measurement,
    MeasurementSession, PendingMeasurement, ProbeReading, ProductExecution,
};
pub use operator::{Operator, Role};
pub use order::{
    NewOrder, NewProductDetail, Order, OrderUpdate, Product, ProductDetail,
    DEFAULT_TKW_MEASUREMENT_INTERVAL_MINUTES,
};
pub use recipe::{ConvertedRates, OrderRecipe, ProductRecipe, StoredOrderRecipe};
pub use types::{OrderStatus, Packaging, RateType, RateUnit};

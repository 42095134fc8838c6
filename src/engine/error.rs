// ==========================================
// 种子包衣订单核心 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 传播策略: 状态机与配方错误同步返回调用方;
//           调度器/通知错误在内部吸收,只体现在日志
// ==========================================

use crate::domain::types::OrderStatus;
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    // ===== 状态机 =====
    #[error("无效的状态转换: from={from} to={to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    // ===== 配方前置条件 =====
    #[error("订单缺少配方所需字段: order_id={order_id}, missing={missing:?}")]
    IncompleteOrderForRecipe {
        order_id: String,
        missing: Vec<&'static str>,
    },

    #[error("换算输入无效 ({field}={value})")]
    InvalidConversionInput { field: &'static str, value: f64 },

    #[error("不支持的剂量规格: unit={unit}, rate_type={rate_type}")]
    UnsupportedRateSpecification { unit: String, rate_type: String },

    #[error("配方退化: {reason}")]
    DegenerateRecipe { reason: String },
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;

// ==========================================
// 种子包衣订单核心 - 引擎层
// ==========================================
// 职责: 实现业务规则(状态机、配方换算、测量调度),不拼 SQL
// 红线: Engine 不拼 SQL;存储与通知通过 trait 注入
// ==========================================

pub mod clock;
pub mod error;
pub mod measurement_scheduler;
pub mod notifier;
pub mod order_state;
pub mod rate_converter;
pub mod recipe;

// 重导出核心引擎
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{EngineError, EngineResult};
pub use measurement_scheduler::{
    due_reason, plan_due_measurements, DueMeasurement, DueReason, MeasurementScheduler,
    SchedulerSkip, SchedulerStore, TickReport,
};
pub use notifier::{
    NoOpNotifier, NoticeKind, Notification, Notifier, PlannedNotice, Recipient,
    DEFAULT_DEEP_LINK_BASE,
};
pub use order_state::{
    allowed_targets, can_transition, OrderStateMachine, SessionArming, TkwUpdate,
    TransitionContext, TransitionPlan,
};
pub use rate_converter::RateConverter;
pub use recipe::RecipeEngine;

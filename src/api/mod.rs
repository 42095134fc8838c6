// ==========================================
// 种子包衣订单核心 - API 层
// ==========================================
// 职责: 组合 Engine 与 Repository,对外提供订单/测量业务操作
// 红线: API 不拼 SQL;业务规则在 Engine,数据访问在 Repository
// ==========================================

pub mod error;
pub mod measurement_api;
pub mod order_api;

pub use error::{ApiError, ApiResult};
pub use measurement_api::MeasurementApi;
pub use order_api::{OrderApi, OrderSettings};

use crate::domain::order::Order;
use crate::engine::notifier::{Notification, Notifier, PlannedNotice};

/// 渲染并发出待发通知(fire-and-forget)
pub(crate) fn dispatch_notices(
    notifier: &dyn Notifier,
    order: &Order,
    notices: &[PlannedNotice],
    deep_link_base: &str,
) {
    for notice in notices {
        notifier.notify(Notification::render(
            notice,
            &order.id,
            &order.lot_number,
            deep_link_base,
        ));
    }
}

// ==========================================
// 种子包衣订单核心 - TKW 定时测量调度器
// ==========================================
// 职责: 对处于测量启用状态的订单,判定是否到期并创建一条测量记录
// 输入: 时间 now + 调度快照(ArmedSession)
// 输出: 新建的 Measurement 列表 + 跳过原因
// ==========================================
// 规则:
// - last_probe = 最近测量的创建时间 ?? 包衣开始时间
// - 到期 = 尚无任何测量 || now - last_probe >= interval_minutes × 60000
// - 写入前由仓储层重新读取订单状态并校验"快照后无新测量"(幂等)
// - 单个订单失败只记日志并跳过,不影响同批其他订单
// - 停机后不做固定次数补测: 每次 tick 每订单至多一条,差值自然自愈
// ==========================================

use crate::domain::measurement::{ArmedSession, ArmedSnapshot, Measurement};
use crate::domain::types::OrderStatus;
use crate::engine::clock::{format_ms, Clock};
use crate::engine::notifier::{NoticeKind, Notification, Notifier, PlannedNotice, Recipient};
use crate::perf::PerfGuard;
use crate::repository::error::RepositoryResult;
use std::sync::Arc;
use thiserror::Error;

// ==========================================
// 存储端口
// ==========================================

/// 调度器所需的存储能力
///
/// 实现者: MeasurementRepository
pub trait SchedulerStore: Send + Sync {
    /// 查询指定状态集合中、包衣已开始的执行记录快照
    ///
    /// 单行解码失败记入 `ArmedSnapshot::malformed`,其余行照常返回
    fn find_armed_sessions(&self, statuses: &[OrderStatus]) -> RepositoryResult<ArmedSnapshot>;

    /// 查询单个订单的快照(订单不在测量启用状态时返回 None)
    fn find_armed_session_for_order(&self, order_id: &str) -> RepositoryResult<Option<ArmedSession>>;

    /// 条件创建测量记录
    ///
    /// 仅当订单仍处于测量启用状态,且自 `snapshot.last_measurement_at_ms` 之后
    /// 没有新测量时才写入;否则返回 None
    fn create_measurement_if_due(
        &self,
        snapshot: &ArmedSession,
        now_ms: i64,
    ) -> RepositoryResult<Option<Measurement>>;
}

// ==========================================
// 到期判定(纯函数)
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueReason {
    /// 包衣已开始但从未测量
    FirstMeasurement,
    /// 距上次测量已超过间隔
    IntervalElapsed { elapsed_ms: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DueMeasurement {
    pub snapshot: ArmedSession,
    pub reason: DueReason,
}

/// 单条快照是否到期
pub fn due_reason(now_ms: i64, snapshot: &ArmedSession) -> Option<DueReason> {
    if !snapshot.status.is_measurement_active() {
        return None;
    }
    match snapshot.last_measurement_at_ms {
        None => Some(DueReason::FirstMeasurement),
        Some(last) => {
            let elapsed_ms = now_ms - last;
            let interval_ms = i64::from(snapshot.interval_minutes) * 60_000;
            (elapsed_ms >= interval_ms).then_some(DueReason::IntervalElapsed { elapsed_ms })
        }
    }
}

/// 从快照中挑出到期的执行记录
pub fn plan_due_measurements(now_ms: i64, snapshot: &[ArmedSession]) -> Vec<DueMeasurement> {
    snapshot
        .iter()
        .filter_map(|s| {
            due_reason(now_ms, s).map(|reason| DueMeasurement {
                snapshot: s.clone(),
                reason,
            })
        })
        .collect()
}

// ==========================================
// 调度结果
// ==========================================

/// 单订单调度失败(记日志后跳过)
#[derive(Error, Debug, Clone, PartialEq)]
#[error("调度跳过订单 order_id={order_id}: {reason}")]
pub struct SchedulerSkip {
    pub order_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub now_ms: i64,
    pub checked: usize,
    pub due: usize,
    pub created: Vec<Measurement>,
    pub skipped: Vec<SchedulerSkip>,
}

// ==========================================
// MeasurementScheduler
// ==========================================
pub struct MeasurementScheduler {
    store: Arc<dyn SchedulerStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    deep_link_base: String,
}

impl MeasurementScheduler {
    pub fn new(
        store: Arc<dyn SchedulerStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        deep_link_base: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            deep_link_base: deep_link_base.into(),
        }
    }

    /// 按注入时钟执行一次 tick
    pub fn tick(&self) -> TickReport {
        self.tick_at(self.clock.now_ms())
    }

    /// 以指定时间执行一次 tick
    pub fn tick_at(&self, now_ms: i64) -> TickReport {
        let _perf = PerfGuard::new("scheduler.tick");
        let mut report = TickReport {
            now_ms,
            ..TickReport::default()
        };

        let snapshot = match self.store.find_armed_sessions(&OrderStatus::MEASUREMENT_ACTIVE) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // 快照查询失败: 本轮整体跳过,下一轮重试
                tracing::error!(error = %e, "TKW 调度快照查询失败");
                return report;
            }
        };
        report.checked = snapshot.sessions.len() + snapshot.malformed.len();
        for bad in snapshot.malformed {
            tracing::warn!(order_id = %bad.order_id, reason = %bad.reason, "订单数据异常,调度跳过");
            report.skipped.push(SchedulerSkip {
                order_id: bad.order_id,
                reason: bad.reason,
            });
        }

        let due = plan_due_measurements(now_ms, &snapshot.sessions);
        report.due = due.len();
        tracing::info!(
            now = %format_ms(now_ms),
            checked = report.checked,
            due = report.due,
            "TKW 调度检查开始"
        );

        for item in due {
            match self.create_and_notify(&item, now_ms) {
                Ok(Some(measurement)) => report.created.push(measurement),
                Ok(None) => {}
                Err(skip) => {
                    tracing::warn!(order_id = %skip.order_id, reason = %skip.reason, "订单调度跳过");
                    report.skipped.push(skip);
                }
            }
        }

        tracing::info!(
            created = report.created.len(),
            skipped = report.skipped.len(),
            "TKW 调度检查完成"
        );
        report
    }

    /// 单订单补检(进入 PendingLabControl 时调用,不等待下一个周期)
    pub fn check_order(&self, order_id: &str) -> Result<Option<Measurement>, SchedulerSkip> {
        let now_ms = self.clock.now_ms();
        let snapshot = self
            .store
            .find_armed_session_for_order(order_id)
            .map_err(|e| SchedulerSkip {
                order_id: order_id.to_string(),
                reason: e.to_string(),
            })?;

        let Some(snapshot) = snapshot else {
            tracing::info!(order_id, "订单未处于测量启用状态或包衣未开始,跳过补检");
            return Ok(None);
        };

        match due_reason(now_ms, &snapshot) {
            Some(reason) => self.create_and_notify(&DueMeasurement { snapshot, reason }, now_ms),
            None => {
                tracing::info!(order_id, "补检: 尚未到期");
                Ok(None)
            }
        }
    }

    fn create_and_notify(
        &self,
        item: &DueMeasurement,
        now_ms: i64,
    ) -> Result<Option<Measurement>, SchedulerSkip> {
        let snapshot = &item.snapshot;
        let created = self
            .store
            .create_measurement_if_due(snapshot, now_ms)
            .map_err(|e| SchedulerSkip {
                order_id: snapshot.order_id.clone(),
                reason: e.to_string(),
            })?;

        let Some(measurement) = created else {
            tracing::info!(
                order_id = %snapshot.order_id,
                session_id = %snapshot.session_id,
                "订单状态已变化或已有更新的测量,放弃创建"
            );
            return Ok(None);
        };

        tracing::info!(
            order_id = %snapshot.order_id,
            session_id = %snapshot.session_id,
            measurement_id = %measurement.id,
            reason = ?item.reason,
            "已创建 TKW 测量记录"
        );

        // fire-and-forget: 通知失败不影响已写入的测量
        let notice = PlannedNotice {
            recipient: Recipient::CompanyLaboratory {
                company_id: snapshot.company_id.clone(),
            },
            kind: NoticeKind::MeasurementDue {
                measurement_id: measurement.id.clone(),
            },
        };
        self.notifier.notify(Notification::render(
            &notice,
            &snapshot.order_id,
            &snapshot.lot_number,
            &self.deep_link_base,
        ));

        Ok(Some(measurement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: i64 = 60_000;
    const T0: i64 = 1_700_000_000_000;

    fn snapshot(status: OrderStatus, interval: u32, last: Option<i64>) -> ArmedSession {
        ArmedSession {
            order_id: "order-1".to_string(),
            company_id: "company-1".to_string(),
            lot_number: "LOT-1".to_string(),
            session_id: "session-1".to_string(),
            status,
            interval_minutes: interval,
            treatment_started_at_ms: T0,
            last_measurement_at_ms: last,
        }
    }

    #[test]
    fn test_first_measurement_always_due() {
        let s = snapshot(OrderStatus::TreatmentInProgress, 600, None);
        assert_eq!(due_reason(T0, &s), Some(DueReason::FirstMeasurement));
    }

    #[test]
    fn test_interval_boundary_is_inclusive() {
        let s = snapshot(OrderStatus::TreatmentInProgress, 30, Some(T0));
        assert_eq!(due_reason(T0 + 30 * MINUTE - 1, &s), None);
        assert_eq!(
            due_reason(T0 + 30 * MINUTE, &s),
            Some(DueReason::IntervalElapsed {
                elapsed_ms: 30 * MINUTE
            })
        );
    }

    #[test]
    fn test_inactive_status_never_due() {
        for status in [
            OrderStatus::PendingAcknowledgement,
            OrderStatus::Completed,
            OrderStatus::Failed,
            OrderStatus::Archived,
        ] {
            let s = snapshot(status, 1, None);
            assert_eq!(due_reason(T0 + 999 * MINUTE, &s), None);
        }
    }

    #[test]
    fn test_clock_skew_is_not_due() {
        let s = snapshot(OrderStatus::PendingLabControl, 10, Some(T0));
        assert_eq!(due_reason(T0 - 5 * MINUTE, &s), None);
    }

    #[test]
    fn test_plan_filters_snapshot() {
        let rows = vec![
            snapshot(OrderStatus::TreatmentInProgress, 60, None),
            snapshot(OrderStatus::TreatmentInProgress, 60, Some(T0 + 10 * MINUTE)),
            snapshot(OrderStatus::PendingLabControl, 5, Some(T0)),
        ];
        let due = plan_due_measurements(T0 + 20 * MINUTE, &rows);
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].reason, DueReason::FirstMeasurement);
        assert_eq!(
            due[1].reason,
            DueReason::IntervalElapsed {
                elapsed_ms: 20 * MINUTE
            }
        );
    }
}

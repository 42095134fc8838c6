// ==========================================
// 种子包衣订单核心 - 执行与测量 API
// ==========================================
// 职责: 执行记录时间戳与现场进度、产品施用量、测量结果录入、测量查询
// 规则: 实验室复核阶段最后一条测量录入后,自动推进到 PendingAcknowledgement
// ==========================================

use std::sync::Arc;

use tracing::instrument;

use crate::api::dispatch_notices;
use crate::api::error::{ApiError, ApiResult};
use crate::domain::measurement::{
    ExecutionProgress, Measurement, MeasurementSession, PendingMeasurement, ProbeReading,
    ProductExecution,
};
use crate::domain::order::Order;
use crate::domain::types::OrderStatus;
use crate::engine::clock::Clock;
use crate::engine::notifier::Notifier;
use crate::engine::order_state::{OrderStateMachine, TransitionContext};
use crate::repository::error::RepositoryError;
use crate::repository::measurement_repo::MeasurementRepository;
use crate::repository::order_repo::OrderRepository;

// ==========================================
// MeasurementApi
// ==========================================
pub struct MeasurementApi {
    measurement_repo: Arc<MeasurementRepository>,
    order_repo: Arc<OrderRepository>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    state_machine: OrderStateMachine,
    deep_link_base: String,
}

impl MeasurementApi {
    pub fn new(
        measurement_repo: Arc<MeasurementRepository>,
        order_repo: Arc<OrderRepository>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        deep_link_base: impl Into<String>,
    ) -> Self {
        Self {
            measurement_repo,
            order_repo,
            notifier,
            clock,
            state_machine: OrderStateMachine::new(),
            deep_link_base: deep_link_base.into(),
        }
    }

    // ==========================================
    // 执行记录
    // ==========================================

    /// 标记备料开始(ReadyToStart / TreatmentInProgress)
    pub fn mark_preparation_started(
        &self,
        order_id: &str,
        actor_id: Option<&str>,
    ) -> ApiResult<MeasurementSession> {
        let order = self
            .order_repo
            .find_by_id(order_id)?
            .ok_or_else(|| ApiError::NotFound(format!("Order(id={})不存在", order_id)))?;
        if !matches!(
            order.status,
            OrderStatus::ReadyToStart | OrderStatus::TreatmentInProgress
        ) {
            return Err(ApiError::InvalidInput(format!(
                "订单状态 {} 不允许开始备料",
                order.status
            )));
        }
        Ok(self
            .measurement_repo
            .mark_preparation_started(order_id, actor_id, self.clock.now_ms())?)
    }

    /// 标记包衣结束
    pub fn mark_treatment_finished(&self, order_id: &str) -> ApiResult<MeasurementSession> {
        Ok(self
            .measurement_repo
            .mark_treatment_finished(order_id, self.clock.now_ms())?)
    }

    /// 保存现场执行进度(ReadyToStart / TreatmentInProgress / PendingLabControl)
    #[instrument(skip(self, progress))]
    pub fn save_execution_progress(
        &self,
        order_id: &str,
        progress: ExecutionProgress,
        actor_id: Option<&str>,
    ) -> ApiResult<MeasurementSession> {
        validate_progress(&progress)?;
        self.order_in_execution(order_id)?;
        Ok(self
            .measurement_repo
            .save_execution_progress(order_id, actor_id, &progress)?)
    }

    /// 记录单个产品的实际施用量(同一产品再次记录时覆盖)
    ///
    /// # 错误
    /// - InvalidInput: 施用量无效,或产品不属于该订单
    /// - NotFound: 订单不存在或尚无执行记录
    #[instrument(skip(self))]
    pub fn record_product_execution(
        &self,
        order_id: &str,
        product_id: &str,
        applied_quantity: f64,
    ) -> ApiResult<ProductExecution> {
        if !applied_quantity.is_finite() || applied_quantity < 0.0 {
            return Err(ApiError::InvalidInput(format!(
                "applied_quantity 不能为负: {}",
                applied_quantity
            )));
        }
        let order = self.order_in_execution(order_id)?;
        if !order.product_details.iter().any(|d| d.product.id == product_id) {
            return Err(ApiError::InvalidInput(format!(
                "产品 {} 不在订单 {} 中",
                product_id, order_id
            )));
        }

        let execution = self.measurement_repo.upsert_product_execution(
            order_id,
            product_id,
            applied_quantity,
            self.clock.now_ms(),
        )?;
        tracing::info!(order_id, product_id, applied_quantity, "产品施用量已记录");
        Ok(execution)
    }

    pub fn list_product_executions(&self, order_id: &str) -> ApiResult<Vec<ProductExecution>> {
        Ok(self.measurement_repo.list_product_executions(order_id)?)
    }

    fn order_in_execution(&self, order_id: &str) -> ApiResult<Order> {
        let order = self
            .order_repo
            .find_by_id(order_id)?
            .ok_or_else(|| ApiError::NotFound(format!("Order(id={})不存在", order_id)))?;
        if !matches!(
            order.status,
            OrderStatus::ReadyToStart
                | OrderStatus::TreatmentInProgress
                | OrderStatus::PendingLabControl
        ) {
            return Err(ApiError::InvalidInput(format!(
                "订单状态 {} 不允许记录执行数据",
                order.status
            )));
        }
        Ok(order)
    }

    // ==========================================
    // 测量录入
    // ==========================================

    /// 录入一次抽检结果(每条测量只能录入一次)
    ///
    /// 录入后若订单处于 PendingLabControl 且已无待录入测量,
    /// 自动推进到 PendingAcknowledgement(推进失败只记日志,不影响录入结果)
    #[instrument(skip(self, reading))]
    pub fn record_probe(
        &self,
        measurement_id: &str,
        reading: ProbeReading,
        actor_id: Option<&str>,
    ) -> ApiResult<Measurement> {
        validate_reading(&reading)?;

        let measurement = self
            .measurement_repo
            .record_probe(measurement_id, &reading, self.clock.now_ms())?;
        tracing::info!(
            measurement_id,
            derived_tkw = ?measurement.derived_tkw,
            "测量结果已录入"
        );

        if let Err(e) = self.advance_after_lab_control(measurement_id, actor_id) {
            tracing::warn!(measurement_id, error = %e, "自动推进到待确认失败");
        }

        Ok(measurement)
    }

    fn advance_after_lab_control(&self, measurement_id: &str, actor_id: Option<&str>) -> ApiResult<()> {
        let Some(order_id) = self.measurement_repo.find_order_id(measurement_id)? else {
            return Ok(());
        };
        let Some(order) = self.order_repo.find_by_id(&order_id)? else {
            return Ok(());
        };
        if order.status != OrderStatus::PendingLabControl {
            return Ok(());
        }
        if self.measurement_repo.count_unprobed_by_order(&order_id)? > 0 {
            return Ok(());
        }

        let ctx = TransitionContext {
            actor_id,
            now_ms: self.clock.now_ms(),
        };
        let plan = self
            .state_machine
            .plan(&order, None, OrderStatus::PendingAcknowledgement, ctx)?;
        match self.order_repo.apply_transition(&plan) {
            Ok(()) => {}
            // 并发录入时另一方已推进
            Err(RepositoryError::StatusConflict { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(order_id = %order.id, "实验室复核完成,订单待确认");
        dispatch_notices(self.notifier.as_ref(), &order, &plan.notices, &self.deep_link_base);
        Ok(())
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn list_measurements(&self, order_id: &str) -> ApiResult<Vec<Measurement>> {
        Ok(self.measurement_repo.list_by_order(order_id)?)
    }

    pub fn latest_measurement(&self, order_id: &str) -> ApiResult<Option<Measurement>> {
        Ok(self.measurement_repo.latest_by_order(order_id)?)
    }

    /// 公司内待录入的测量
    pub fn list_pending_measurements(&self, company_id: &str) -> ApiResult<Vec<PendingMeasurement>> {
        Ok(self.measurement_repo.list_pending_by_company(company_id)?)
    }

    pub fn get_session(&self, order_id: &str) -> ApiResult<Option<MeasurementSession>> {
        Ok(self.measurement_repo.find_session_by_order(order_id)?)
    }
}

fn validate_reading(reading: &ProbeReading) -> ApiResult<()> {
    if reading.probes.iter().all(Option::is_none) {
        return Err(ApiError::InvalidInput("至少需要一个抽检值".to_string()));
    }
    for (i, p) in reading.probes.iter().enumerate() {
        if let Some(v) = p {
            if !v.is_finite() || *v <= 0.0 {
                return Err(ApiError::InvalidInput(format!(
                    "第{}个抽检值必须为正数: {}",
                    i + 1,
                    v
                )));
            }
        }
    }
    Ok(())
}

fn validate_progress(progress: &ExecutionProgress) -> ApiResult<()> {
    let quantities = [
        ("packed_seeds_to_treat_kg", progress.packed_seeds_to_treat_kg),
        ("slurry_consumption_per_lot_kg", progress.slurry_consumption_per_lot_kg),
    ];
    for (field, value) in quantities {
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(ApiError::InvalidInput(format!("{} 不能为负: {}", field, v)));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_reading() {
        assert!(validate_reading(&ProbeReading::new(Some(44.0), None, None)).is_ok());
        assert!(validate_reading(&ProbeReading::new(None, None, None)).is_err());
        assert!(validate_reading(&ProbeReading::new(Some(44.0), Some(f64::NAN), None)).is_err());
        assert!(validate_reading(&ProbeReading::new(Some(0.0), None, None)).is_err());
    }

    #[test]
    fn test_validate_progress() {
        assert!(validate_progress(&ExecutionProgress::default()).is_ok());
        let bad = ExecutionProgress {
            slurry_consumption_per_lot_kg: Some(-1.0),
            ..ExecutionProgress::default()
        };
        assert!(validate_progress(&bad).is_err());
    }
}

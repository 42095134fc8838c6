// ==========================================
// 种子包衣订单核心 - 订单 API
// ==========================================
// 职责: 订单创建/定稿、实验室 TKW 录入、状态转换、配方重算、查询/删除
// 红线: 转换计划由状态机生成,仓储层单事务落库;通知在落库成功后发出
// ==========================================

use std::collections::HashSet;
use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::api::dispatch_notices;
use crate::domain::order::{NewOrder, NewProductDetail, Order, OrderUpdate, ProductDetail};
use crate::domain::recipe::{OrderRecipe, StoredOrderRecipe};
use crate::domain::types::OrderStatus;
use crate::engine::clock::Clock;
use crate::engine::error::EngineError;
use crate::engine::measurement_scheduler::MeasurementScheduler;
use crate::engine::notifier::{NoticeKind, Notifier, PlannedNotice, Recipient};
use crate::engine::order_state::{OrderStateMachine, TransitionContext};
use crate::engine::rate_converter::RateConverter;
use crate::engine::recipe::RecipeEngine;
use crate::repository::measurement_repo::MeasurementRepository;
use crate::repository::order_repo::OrderRepository;
use crate::repository::product_repo::ProductRepository;
use crate::repository::recipe_repo::RecipeRepository;

/// 订单流程参数(来自配置)
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSettings {
    pub lab_workflow_enabled: bool,
    pub default_tkw_measurement_interval_minutes: u32,
    pub deep_link_base: String,
}

// ==========================================
// OrderApi - 订单 API
// ==========================================
pub struct OrderApi {
    order_repo: Arc<OrderRepository>,
    product_repo: Arc<ProductRepository>,
    recipe_repo: Arc<RecipeRepository>,
    measurement_repo: Arc<MeasurementRepository>,
    scheduler: Arc<MeasurementScheduler>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    state_machine: OrderStateMachine,
    recipe_engine: RecipeEngine,
    settings: OrderSettings,
}

impl OrderApi {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_repo: Arc<OrderRepository>,
        product_repo: Arc<ProductRepository>,
        recipe_repo: Arc<RecipeRepository>,
        measurement_repo: Arc<MeasurementRepository>,
        scheduler: Arc<MeasurementScheduler>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        settings: OrderSettings,
    ) -> Self {
        Self {
            order_repo,
            product_repo,
            recipe_repo,
            measurement_repo,
            scheduler,
            notifier,
            clock,
            state_machine: OrderStateMachine::new(),
            recipe_engine: RecipeEngine::new(),
            settings,
        }
    }

    // ==========================================
    // 创建
    // ==========================================

    /// 创建订单
    ///
    /// - 启用实验室流程: 初始状态 AwaitingLabInitiation,通知实验室测定 TKW
    /// - 未启用: 必须提供 tkw,直接进入 ReadyToStart 并在同一事务写入配方
    #[instrument(skip(self, new_order), fields(lot_number = %new_order.lot_number, company_id = %new_order.company_id))]
    pub fn create_order(&self, new_order: NewOrder, actor_id: Option<&str>) -> ApiResult<Order> {
        validate_new_order(&new_order)?;

        let order_id = Uuid::new_v4().to_string();
        let product_details = self.resolve_product_details(&new_order.product_details)?;

        let lab_workflow = self.settings.lab_workflow_enabled;
        let mut order = Order {
            id: order_id,
            lot_number: new_order.lot_number.trim().to_string(),
            company_id: new_order.company_id.trim().to_string(),
            status: if lab_workflow {
                OrderStatus::AwaitingLabInitiation
            } else {
                OrderStatus::ReadyToStart
            },
            operator_id: new_order.operator_id.or_else(|| actor_id.map(str::to_string)),
            tkw: new_order.tkw,
            tkw_reps: [None; 3],
            tkw_measured_at_ms: None,
            seeds_to_treat_kg: new_order.seeds_to_treat_kg,
            extra_slurry_percent: new_order.extra_slurry_percent,
            packaging: new_order.packaging,
            bag_size: new_order.bag_size,
            tkw_measurement_interval_minutes: new_order
                .tkw_measurement_interval_minutes
                .unwrap_or(self.settings.default_tkw_measurement_interval_minutes),
            created_at_ms: self.clock.now_ms(),
            application_at_ms: None,
            completed_at_ms: None,
            product_details,
        };

        if lab_workflow {
            self.order_repo.insert(&order, None)?;
            dispatch_notices(
                self.notifier.as_ref(),
                &order,
                &[PlannedNotice {
                    recipient: Recipient::CompanyLaboratory {
                        company_id: order.company_id.clone(),
                    },
                    kind: NoticeKind::LabTkwRequested,
                }],
                &self.settings.deep_link_base,
            );
        } else {
            if order.tkw.is_none() {
                return Err(EngineError::IncompleteOrderForRecipe {
                    order_id: order.id.clone(),
                    missing: vec!["tkw"],
                }
                .into());
            }
            let recipe = self.recipe_engine.compute(&order)?;
            order.tkw_measured_at_ms = Some(order.created_at_ms);
            self.order_repo.insert(&order, Some(&recipe))?;
            dispatch_notices(
                self.notifier.as_ref(),
                &order,
                &[PlannedNotice {
                    recipient: Recipient::operator_or_company(
                        order.operator_id.as_deref(),
                        &order.company_id,
                    ),
                    kind: NoticeKind::OrderReady,
                }],
                &self.settings.deep_link_base,
            );
        }

        Ok(order)
    }

    /// 订单定稿: 整体替换配方输入并重算配方(同一事务)
    ///
    /// - AwaitingLabInitiation: 只更新输入,TKW 仍由实验室录入,不生成配方
    /// - LabInitiated: 按新输入生成配方并推进到 ReadyToStart,通知操作员
    /// - ReadyToStart: 按新输入整体替换配方,状态不变
    ///
    /// # 错误
    /// - RecipeLocked: 订单已进入包衣或更后的状态
    /// - InvalidInput / NotFound: 输入无效或产品不存在
    /// - ConcurrentModification: 期间订单状态被其他操作修改
    #[instrument(skip(self, update))]
    pub fn finalize_order(
        &self,
        order_id: &str,
        update: OrderUpdate,
        actor_id: Option<&str>,
    ) -> ApiResult<Order> {
        validate_order_update(&update)?;

        let order = self.get_order(order_id)?;
        if !matches!(
            order.status,
            OrderStatus::AwaitingLabInitiation | OrderStatus::LabInitiated | OrderStatus::ReadyToStart
        ) {
            return Err(ApiError::RecipeLocked {
                order_id: order.id,
                status: order.status.to_db_str().to_string(),
            });
        }
        if order.status == OrderStatus::AwaitingLabInitiation && update.tkw.is_some() {
            return Err(ApiError::InvalidInput(
                "实验室测定前 tkw 只能由实验室录入".to_string(),
            ));
        }

        let now_ms = self.clock.now_ms();
        let mut updated = order.clone();
        updated.product_details = self.resolve_product_details(&update.product_details)?;
        if let Some(operator_id) = update.operator_id {
            updated.operator_id = Some(operator_id);
        }
        if let Some(tkw) = update.tkw {
            updated.tkw = Some(tkw);
            updated.tkw_measured_at_ms = Some(now_ms);
        }
        if let Some(kg) = update.seeds_to_treat_kg {
            updated.seeds_to_treat_kg = kg;
        }
        if let Some(extra) = update.extra_slurry_percent {
            updated.extra_slurry_percent = Some(extra);
        }
        if let Some(packaging) = update.packaging {
            updated.packaging = Some(packaging);
        }
        if let Some(bag_size) = update.bag_size {
            updated.bag_size = Some(bag_size);
        }
        if let Some(interval) = update.tkw_measurement_interval_minutes {
            updated.tkw_measurement_interval_minutes = interval;
        }

        let (recipe, notices) = match order.status {
            OrderStatus::LabInitiated => {
                let ctx = TransitionContext { actor_id, now_ms };
                let plan = self
                    .state_machine
                    .plan(&updated, None, OrderStatus::ReadyToStart, ctx)?;
                updated.status = plan.to;
                (plan.recipe, plan.notices)
            }
            OrderStatus::ReadyToStart => (Some(self.recipe_engine.compute(&updated)?), Vec::new()),
            _ => (None, Vec::new()),
        };

        self.order_repo
            .finalize(&updated, order.status, recipe.as_ref(), now_ms)?;
        dispatch_notices(self.notifier.as_ref(), &updated, &notices, &self.settings.deep_link_base);

        self.get_order(order_id)
    }

    /// 解析剂量规格并加载产品
    fn resolve_product_details(&self, details: &[NewProductDetail]) -> ApiResult<Vec<ProductDetail>> {
        let mut resolved = Vec::with_capacity(details.len());
        for d in details {
            let (rate_unit, rate_type) = RateConverter::parse_rate_spec(&d.rate_unit, &d.rate_type)?;
            let product = self
                .product_repo
                .find_by_id(&d.product_id)?
                .ok_or_else(|| ApiError::NotFound(format!("Product(id={})不存在", d.product_id)))?;
            resolved.push(ProductDetail {
                id: Uuid::new_v4().to_string(),
                index: d.index,
                product,
                rate: d.rate,
                rate_unit,
                rate_type,
            });
        }
        Ok(resolved)
    }

    // ==========================================
    // 配方
    // ==========================================

    /// 预览配方(不落库)
    pub fn preview_recipe(&self, order: &Order) -> ApiResult<OrderRecipe> {
        Ok(self.recipe_engine.compute(order)?)
    }

    /// 读取订单当前配方
    pub fn get_recipe(&self, order_id: &str) -> ApiResult<Option<StoredOrderRecipe>> {
        Ok(self.recipe_repo.find_by_order(order_id)?)
    }

    /// 重算并整体替换配方(仅 LabInitiated / ReadyToStart)
    #[instrument(skip(self))]
    pub fn recompute_recipe(&self, order_id: &str) -> ApiResult<StoredOrderRecipe> {
        let order = self.get_order(order_id)?;
        if !matches!(
            order.status,
            OrderStatus::LabInitiated | OrderStatus::ReadyToStart
        ) {
            return Err(ApiError::RecipeLocked {
                order_id: order.id,
                status: order.status.to_db_str().to_string(),
            });
        }

        let recipe = self.recipe_engine.compute(&order)?;
        let stored =
            self.recipe_repo
                .replace_for_order(&order.id, order.status, &recipe, self.clock.now_ms())?;
        Ok(stored)
    }

    // ==========================================
    // 状态转换
    // ==========================================

    /// 实验室录入三次重复 TKW,推进到 LabInitiated
    #[instrument(skip(self, reps))]
    pub fn record_lab_tkw(
        &self,
        order_id: &str,
        reps: [Option<f64>; 3],
        actor_id: Option<&str>,
    ) -> ApiResult<Order> {
        for (i, rep) in reps.iter().enumerate() {
            if let Some(v) = rep {
                if !v.is_finite() || *v <= 0.0 {
                    return Err(ApiError::InvalidInput(format!(
                        "TKW 第{}次重复值必须为正数: {}",
                        i + 1,
                        v
                    )));
                }
            }
        }

        let order = self.get_order(order_id)?;
        let ctx = TransitionContext {
            actor_id,
            now_ms: self.clock.now_ms(),
        };
        let plan = self.state_machine.plan_lab_tkw(&order, reps, ctx)?;
        self.order_repo.apply_transition(&plan)?;
        dispatch_notices(self.notifier.as_ref(), &order, &plan.notices, &self.settings.deep_link_base);

        self.get_order(order_id)
    }

    /// 状态转换
    ///
    /// # 错误
    /// - Engine(InvalidTransition): 转换表不允许
    /// - Engine(IncompleteOrderForRecipe 等): 前置条件不满足(状态不变)
    /// - ConcurrentModification: 期间订单状态被其他操作修改
    #[instrument(skip(self))]
    pub fn transition(
        &self,
        order_id: &str,
        target: OrderStatus,
        actor_id: Option<&str>,
    ) -> ApiResult<Order> {
        let order = self.get_order(order_id)?;
        let session = self.measurement_repo.find_session_by_order(order_id)?;
        let ctx = TransitionContext {
            actor_id,
            now_ms: self.clock.now_ms(),
        };

        let plan = self
            .state_machine
            .plan(&order, session.as_ref(), target, ctx)?;
        self.order_repo.apply_transition(&plan)?;

        dispatch_notices(self.notifier.as_ref(), &order, &plan.notices, &self.settings.deep_link_base);

        if plan.catch_up_check {
            match self.scheduler.check_order(order_id) {
                Ok(Some(m)) => {
                    tracing::info!(order_id, measurement_id = %m.id, "进入实验室复核,已补建测量")
                }
                Ok(None) => {}
                Err(skip) => tracing::warn!(error = %skip, "补检失败,等待下一轮调度"),
            }
        }

        self.get_order(order_id)
    }

    // ==========================================
    // 查询 / 删除
    // ==========================================

    pub fn get_order(&self, order_id: &str) -> ApiResult<Order> {
        self.order_repo
            .find_by_id(order_id)?
            .ok_or_else(|| ApiError::NotFound(format!("Order(id={})不存在", order_id)))
    }

    /// 公司订单列表(不含已归档)
    pub fn list_orders(&self, company_id: &str) -> ApiResult<Vec<Order>> {
        Ok(self.order_repo.list_by_company(company_id, false)?)
    }

    /// 删除订单(级联删除产品行、配方、执行记录与测量)
    pub fn delete_order(&self, order_id: &str) -> ApiResult<()> {
        Ok(self.order_repo.delete(order_id)?)
    }
}

// ==========================================
// 输入校验
// ==========================================

fn validate_new_order(new_order: &NewOrder) -> ApiResult<()> {
    if new_order.lot_number.trim().is_empty() {
        return Err(ApiError::InvalidInput("lot_number 不能为空".to_string()));
    }
    if new_order.company_id.trim().is_empty() {
        return Err(ApiError::InvalidInput("company_id 不能为空".to_string()));
    }
    validate_recipe_inputs(
        Some(new_order.seeds_to_treat_kg),
        new_order.tkw,
        new_order.bag_size,
        new_order.extra_slurry_percent,
        new_order.tkw_measurement_interval_minutes,
    )?;
    validate_product_details(&new_order.product_details)
}

fn validate_order_update(update: &OrderUpdate) -> ApiResult<()> {
    validate_recipe_inputs(
        update.seeds_to_treat_kg,
        update.tkw,
        update.bag_size,
        update.extra_slurry_percent,
        update.tkw_measurement_interval_minutes,
    )?;
    validate_product_details(&update.product_details)
}

fn validate_recipe_inputs(
    seeds_to_treat_kg: Option<f64>,
    tkw: Option<f64>,
    bag_size: Option<f64>,
    extra_slurry_percent: Option<f64>,
    interval_minutes: Option<u32>,
) -> ApiResult<()> {
    let positive = [
        ("seeds_to_treat_kg", seeds_to_treat_kg),
        ("tkw", tkw),
        ("bag_size", bag_size),
    ];
    for (field, value) in positive {
        if let Some(v) = value {
            if !v.is_finite() || v <= 0.0 {
                return Err(ApiError::InvalidInput(format!("{} 必须为正数: {}", field, v)));
            }
        }
    }
    if let Some(extra) = extra_slurry_percent {
        if !extra.is_finite() || extra < 0.0 {
            return Err(ApiError::InvalidInput(format!(
                "extra_slurry_percent 不能为负: {}",
                extra
            )));
        }
    }
    if interval_minutes == Some(0) {
        return Err(ApiError::InvalidInput(
            "tkw_measurement_interval_minutes 必须至少为 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_product_details(details: &[NewProductDetail]) -> ApiResult<()> {
    if details.is_empty() {
        return Err(ApiError::InvalidInput("订单至少需要一个产品".to_string()));
    }
    let mut seen = HashSet::new();
    for d in details {
        if !seen.insert(d.index) {
            return Err(ApiError::InvalidInput(format!("产品行 index 重复: {}", d.index)));
        }
        if !d.rate.is_finite() || d.rate < 0.0 {
            return Err(ApiError::InvalidInput(format!(
                "产品 {} 的剂量无效: {}",
                d.product_id, d.rate
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_order() -> NewOrder {
        NewOrder {
            lot_number: "LOT-1".to_string(),
            company_id: "c-1".to_string(),
            operator_id: None,
            tkw: Some(45.0),
            seeds_to_treat_kg: 1000.0,
            extra_slurry_percent: Some(5.0),
            packaging: None,
            bag_size: Some(25.0),
            tkw_measurement_interval_minutes: None,
            product_details: vec![NewProductDetail {
                product_id: "p-1".to_string(),
                index: 0,
                rate: 100.0,
                rate_unit: "ml".to_string(),
                rate_type: "per100kg".to_string(),
            }],
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_order() {
        assert!(validate_new_order(&new_order()).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_inputs() {
        let mut o = new_order();
        o.lot_number = "  ".to_string();
        assert!(matches!(validate_new_order(&o), Err(ApiError::InvalidInput(_))));

        let mut o = new_order();
        o.tkw = Some(-1.0);
        assert!(matches!(validate_new_order(&o), Err(ApiError::InvalidInput(_))));

        let mut o = new_order();
        o.product_details.push(o.product_details[0].clone());
        assert!(matches!(validate_new_order(&o), Err(ApiError::InvalidInput(_))));

        let mut o = new_order();
        o.tkw_measurement_interval_minutes = Some(0);
        assert!(matches!(validate_new_order(&o), Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn test_validate_update_rejects_bad_inputs() {
        let update = OrderUpdate {
            product_details: new_order().product_details,
            ..OrderUpdate::default()
        };
        assert!(validate_order_update(&update).is_ok());

        let mut bad = update.clone();
        bad.seeds_to_treat_kg = Some(0.0);
        assert!(matches!(validate_order_update(&bad), Err(ApiError::InvalidInput(_))));

        let mut bad = update.clone();
        bad.extra_slurry_percent = Some(f64::NAN);
        assert!(matches!(validate_order_update(&bad), Err(ApiError::InvalidInput(_))));

        let mut bad = update;
        bad.product_details.clear();
        assert!(matches!(validate_order_update(&bad), Err(ApiError::InvalidInput(_))));
    }
}

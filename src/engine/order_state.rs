// ==========================================
// 种子包衣订单核心 - 订单状态机
// ==========================================
// 职责: 校验状态转换 + 生成转换计划(状态、时间戳、副作用产物)
// 红线: 合法性只看转换表;非法转换报 InvalidTransition,从不静默修正
// 红线: Engine 不拼 SQL,计划由仓储层在单个事务内落库
// ==========================================
// 副作用:
// - → LabInitiated:        要求 tkw 已测定
// - → ReadyToStart:        计算并整体替换配方;通知操作员(或全公司)
// - → TreatmentInProgress: 要求 tkw;启用定时测量;首次绑定执行人
// - → PendingLabControl:   落库后立即补做一次到期检查
// - → PendingAcknowledgement: 通知全公司
// - → Completed / Failed:  写完成时间;调度器按状态自动停用
// ==========================================

use crate::domain::measurement::{MeasurementSession, ProbeReading};
use crate::domain::order::Order;
use crate::domain::recipe::OrderRecipe;
use crate::domain::types::OrderStatus;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::notifier::{NoticeKind, PlannedNotice, Recipient};
use crate::engine::recipe::RecipeEngine;
use tracing::instrument;
use uuid::Uuid;

// ==========================================
// 转换表
// ==========================================

/// 给定状态允许进入的目标状态
pub fn allowed_targets(from: OrderStatus) -> &'static [OrderStatus] {
    use OrderStatus::*;
    match from {
        AwaitingLabInitiation => &[LabInitiated, Failed, Archived],
        LabInitiated => &[ReadyToStart, Failed, Archived],
        ReadyToStart => &[TreatmentInProgress, Failed, Archived],
        TreatmentInProgress => &[PendingLabControl, PendingAcknowledgement, Failed],
        PendingLabControl => &[PendingAcknowledgement, Failed],
        PendingAcknowledgement => &[Completed, Failed],
        Completed => &[Archived],
        Failed => &[Archived],
        Archived => &[],
    }
}

pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    allowed_targets(from).contains(&to)
}

// ==========================================
// 转换计划
// ==========================================

/// 转换上下文
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
    /// 发起转换的操作员(可为空,如系统自动推进)
    pub actor_id: Option<&'a str>,
    pub now_ms: i64,
}

/// 定时测量启用动作
#[derive(Debug, Clone, PartialEq)]
pub enum SessionArming {
    /// 新建执行记录并写入包衣开始时间
    Create {
        session_id: String,
        operator_id: Option<String>,
        treatment_started_at_ms: i64,
    },
    /// 已有执行记录但尚未开始包衣
    StampStart {
        session_id: String,
        treatment_started_at_ms: i64,
    },
}

/// 实验室 TKW 录入
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TkwUpdate {
    pub reps: [Option<f64>; 3],
    pub tkw: f64,
    pub measured_at_ms: i64,
}

/// 转换计划(全部字段在同一事务内落库)
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    pub order_id: String,
    pub from: OrderStatus,
    pub to: OrderStatus,
    /// 计划生成时间(配方 computed_at 等使用)
    pub planned_at_ms: i64,
    pub bind_operator: Option<String>,
    pub application_at_ms: Option<i64>,
    pub completed_at_ms: Option<i64>,
    pub tkw_update: Option<TkwUpdate>,
    pub arming: Option<SessionArming>,
    pub recipe: Option<OrderRecipe>,
    /// 落库后是否立即补做一次到期检查
    pub catch_up_check: bool,
    pub notices: Vec<PlannedNotice>,
}

impl TransitionPlan {
    fn new(order: &Order, to: OrderStatus, now_ms: i64) -> Self {
        Self {
            order_id: order.id.clone(),
            from: order.status,
            to,
            planned_at_ms: now_ms,
            bind_operator: None,
            application_at_ms: None,
            completed_at_ms: None,
            tkw_update: None,
            arming: None,
            recipe: None,
            catch_up_check: false,
            notices: Vec::new(),
        }
    }
}

// ==========================================
// OrderStateMachine
// ==========================================
#[derive(Debug, Default, Clone, Copy)]
pub struct OrderStateMachine {
    recipe_engine: RecipeEngine,
}

impl OrderStateMachine {
    pub fn new() -> Self {
        Self {
            recipe_engine: RecipeEngine::new(),
        }
    }

    /// 生成状态转换计划
    ///
    /// # 参数
    /// - order: 当前订单(含产品行)
    /// - session: 订单执行记录(可能尚未创建)
    /// - to: 目标状态
    ///
    /// # 错误
    /// - InvalidTransition: 转换表不允许
    /// - IncompleteOrderForRecipe 等配方错误: 前置条件不满足
    #[instrument(skip_all, fields(order_id = %order.id, from = %order.status, to = %to))]
    pub fn plan(
        &self,
        order: &Order,
        session: Option<&MeasurementSession>,
        to: OrderStatus,
        ctx: TransitionContext<'_>,
    ) -> EngineResult<TransitionPlan> {
        if !can_transition(order.status, to) {
            return Err(EngineError::InvalidTransition {
                from: order.status,
                to,
            });
        }

        let mut plan = TransitionPlan::new(order, to, ctx.now_ms);

        match to {
            OrderStatus::LabInitiated => {
                Self::require_tkw(order)?;
            }
            OrderStatus::ReadyToStart => {
                plan.recipe = Some(self.recipe_engine.compute(order)?);
                plan.notices.push(PlannedNotice {
                    recipient: Recipient::operator_or_company(
                        order.operator_id.as_deref(),
                        &order.company_id,
                    ),
                    kind: NoticeKind::OrderReady,
                });
            }
            OrderStatus::TreatmentInProgress => {
                Self::require_tkw(order)?;

                // 首次写入者生效: 已有执行人时不改绑
                if order.operator_id.is_none() {
                    plan.bind_operator = ctx.actor_id.map(str::to_string);
                }
                plan.application_at_ms = Some(order.application_at_ms.unwrap_or(ctx.now_ms));

                plan.arming = match session {
                    None => Some(SessionArming::Create {
                        session_id: Uuid::new_v4().to_string(),
                        operator_id: order
                            .operator_id
                            .clone()
                            .or_else(|| plan.bind_operator.clone()),
                        treatment_started_at_ms: ctx.now_ms,
                    }),
                    Some(s) if s.treatment_started_at_ms.is_none() => {
                        Some(SessionArming::StampStart {
                            session_id: s.id.clone(),
                            treatment_started_at_ms: ctx.now_ms,
                        })
                    }
                    Some(_) => None,
                };
            }
            OrderStatus::PendingLabControl => {
                plan.catch_up_check = true;
            }
            OrderStatus::PendingAcknowledgement => {
                plan.notices.push(PlannedNotice {
                    recipient: Recipient::CompanyBroadcast {
                        company_id: order.company_id.clone(),
                    },
                    kind: NoticeKind::AwaitingAcknowledgement,
                });
            }
            OrderStatus::Completed | OrderStatus::Failed => {
                plan.completed_at_ms = Some(ctx.now_ms);
            }
            OrderStatus::Archived | OrderStatus::AwaitingLabInitiation => {}
        }

        tracing::debug!(
            recipe = plan.recipe.is_some(),
            arming = plan.arming.is_some(),
            catch_up = plan.catch_up_check,
            "状态转换计划已生成"
        );

        Ok(plan)
    }

    /// 实验室录入三次重复 TKW 并推进到 LabInitiated
    ///
    /// tkw 取已提供重复值的平均数
    pub fn plan_lab_tkw(
        &self,
        order: &Order,
        reps: [Option<f64>; 3],
        ctx: TransitionContext<'_>,
    ) -> EngineResult<TransitionPlan> {
        let tkw = ProbeReading { probes: reps }.mean().ok_or_else(|| {
            EngineError::IncompleteOrderForRecipe {
                order_id: order.id.clone(),
                missing: vec!["tkw"],
            }
        })?;
        if !tkw.is_finite() || tkw <= 0.0 {
            return Err(EngineError::InvalidConversionInput {
                field: "tkw",
                value: tkw,
            });
        }

        let mut measured = order.clone();
        measured.tkw = Some(tkw);
        let mut plan = self.plan(&measured, None, OrderStatus::LabInitiated, ctx)?;
        plan.tkw_update = Some(TkwUpdate {
            reps,
            tkw,
            measured_at_ms: ctx.now_ms,
        });
        Ok(plan)
    }

    fn require_tkw(order: &Order) -> EngineResult<()> {
        if order.tkw.is_none() {
            return Err(EngineError::IncompleteOrderForRecipe {
                order_id: order.id.clone(),
                missing: vec!["tkw"],
            });
        }
        Ok(())
    }
}

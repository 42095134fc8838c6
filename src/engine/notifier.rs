// ==========================================
// 种子包衣订单核心 - 通知输出端口
// ==========================================
// 职责: 定义通知 trait,实现依赖倒置
// 说明: Engine 层只定义 trait 与消息内容,投递由 notification 模块实现
// 红线: notify 不返回错误、不阻塞;投递失败只记日志
// ==========================================

use crate::i18n::t_with_args;
use serde::{Deserialize, Serialize};

/// 默认深链前缀
pub const DEFAULT_DEEP_LINK_BASE: &str = "seedtreat://";

// ==========================================
// 收件人
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recipient {
    /// 指定操作员
    Operator { operator_id: String },
    /// 公司内全部包衣操作员
    CompanyBroadcast { company_id: String },
    /// 公司内实验室人员
    CompanyLaboratory { company_id: String },
}

impl Recipient {
    /// 有指定操作员时发给本人,否则广播给公司
    pub fn operator_or_company(operator_id: Option<&str>, company_id: &str) -> Self {
        match operator_id {
            Some(id) => Recipient::Operator {
                operator_id: id.to_string(),
            },
            None => Recipient::CompanyBroadcast {
                company_id: company_id.to_string(),
            },
        }
    }
}

// ==========================================
// 通知类型
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeKind {
    /// 实验室需测定 TKW
    LabTkwRequested,
    /// 订单配方已就绪,可开始包衣
    OrderReady,
    /// 新的 TKW 抽检到期
    MeasurementDue { measurement_id: String },
    /// 订单待确认
    AwaitingAcknowledgement,
}

impl NoticeKind {
    fn i18n_prefix(&self) -> &'static str {
        match self {
            NoticeKind::LabTkwRequested => "notification.lab_tkw_requested",
            NoticeKind::OrderReady => "notification.order_ready",
            NoticeKind::MeasurementDue { .. } => "notification.measurement_due",
            NoticeKind::AwaitingAcknowledgement => "notification.awaiting_acknowledgement",
        }
    }
}

/// 状态机/调度器产出的待发通知(尚未渲染文本)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedNotice {
    pub recipient: Recipient,
    pub kind: NoticeKind,
}

// ==========================================
// 通知消息
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: Recipient,
    pub title: String,
    pub body: String,
    pub deep_link: String,
}

impl Notification {
    /// 渲染通知文本与深链
    pub fn render(notice: &PlannedNotice, order_id: &str, lot_number: &str, deep_link_base: &str) -> Self {
        let prefix = notice.kind.i18n_prefix();
        let args = [("lot", lot_number)];
        let deep_link = match &notice.kind {
            NoticeKind::MeasurementDue { measurement_id } => format!(
                "{}orders/{}/measurements/{}",
                deep_link_base, order_id, measurement_id
            ),
            _ => format!("{}orders/{}", deep_link_base, order_id),
        };
        Self {
            recipient: notice.recipient.clone(),
            title: t_with_args(&format!("{}.title", prefix), &args),
            body: t_with_args(&format!("{}.body", prefix), &args),
            deep_link,
        }
    }
}

// ==========================================
// 通知 Trait
// ==========================================

/// 通知发送者
///
/// 语义为 fire-and-forget: 实现必须立即返回,
/// 投递失败不得回滚触发方已持久化的数据
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// 空操作通知者
///
/// 用于不需要通知的场景（如单元测试）
#[derive(Debug, Clone, Default)]
pub struct NoOpNotifier;

impl Notifier for NoOpNotifier {
    fn notify(&self, notification: Notification) {
        tracing::debug!(
            recipient = ?notification.recipient,
            title = %notification.title,
            "NoOpNotifier: 跳过通知"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_or_company() {
        assert_eq!(
            Recipient::operator_or_company(Some("op-1"), "c-1"),
            Recipient::Operator {
                operator_id: "op-1".to_string()
            }
        );
        assert_eq!(
            Recipient::operator_or_company(None, "c-1"),
            Recipient::CompanyBroadcast {
                company_id: "c-1".to_string()
            }
        );
    }

    #[test]
    fn test_render_deep_links() {
        let notice = PlannedNotice {
            recipient: Recipient::CompanyLaboratory {
                company_id: "c-1".to_string(),
            },
            kind: NoticeKind::MeasurementDue {
                measurement_id: "m-9".to_string(),
            },
        };
        let n = Notification::render(&notice, "o-1", "LOT-1", DEFAULT_DEEP_LINK_BASE);
        assert_eq!(n.deep_link, "seedtreat://orders/o-1/measurements/m-9");
        assert!(!n.title.is_empty());

        let ready = PlannedNotice {
            recipient: Recipient::operator_or_company(None, "c-1"),
            kind: NoticeKind::OrderReady,
        };
        let n = Notification::render(&ready, "o-1", "LOT-1", DEFAULT_DEEP_LINK_BASE);
        assert_eq!(n.deep_link, "seedtreat://orders/o-1");
    }
}

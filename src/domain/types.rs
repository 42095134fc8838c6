// ==========================================
// 种子包衣订单核心 - 领域类型定义
// ==========================================
// 职责: 订单状态 / 包装方式 / 剂量单位与基准
// 红线: 状态是封闭枚举,合法性只看转换表,不做字符串比较
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 订单状态 (Order Status)
// ==========================================
// 正常推进顺序:
// AwaitingLabInitiation → LabInitiated → ReadyToStart → TreatmentInProgress
//   → PendingLabControl → PendingAcknowledgement → Completed
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    AwaitingLabInitiation,  // 等待实验室测定 TKW
    LabInitiated,           // TKW 已确认
    ReadyToStart,           // 配方已生成,待包衣
    TreatmentInProgress,    // 包衣进行中(定时测量已启用)
    PendingLabControl,      // 待实验室复核
    PendingAcknowledgement, // 待确认
    Completed,              // 已完成
    Failed,                 // 失败
    Archived,               // 已归档(软删除)
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 9] = [
        OrderStatus::AwaitingLabInitiation,
        OrderStatus::LabInitiated,
        OrderStatus::ReadyToStart,
        OrderStatus::TreatmentInProgress,
        OrderStatus::PendingLabControl,
        OrderStatus::PendingAcknowledgement,
        OrderStatus::Completed,
        OrderStatus::Failed,
        OrderStatus::Archived,
    ];

    /// 定时测量处于启用状态的订单状态集合
    pub const MEASUREMENT_ACTIVE: [OrderStatus; 2] = [
        OrderStatus::TreatmentInProgress,
        OrderStatus::PendingLabControl,
    ];

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            OrderStatus::AwaitingLabInitiation => "AWAITING_LAB_INITIATION",
            OrderStatus::LabInitiated => "LAB_INITIATED",
            OrderStatus::ReadyToStart => "READY_TO_START",
            OrderStatus::TreatmentInProgress => "TREATMENT_IN_PROGRESS",
            OrderStatus::PendingLabControl => "PENDING_LAB_CONTROL",
            OrderStatus::PendingAcknowledgement => "PENDING_ACKNOWLEDGEMENT",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Archived => "ARCHIVED",
        }
    }

    /// 从数据库字符串解析;未知值返回 None,由调用方决定如何报错
    pub fn from_db_str(s: &str) -> Option<Self> {
        OrderStatus::ALL
            .iter()
            .copied()
            .find(|status| status.to_db_str() == s)
    }

    /// 终态: 不再推进业务流程(只允许归档)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Failed | OrderStatus::Archived
        )
    }

    /// 包衣开始前的状态
    pub fn is_pre_treatment(&self) -> bool {
        matches!(
            self,
            OrderStatus::AwaitingLabInitiation
                | OrderStatus::LabInitiated
                | OrderStatus::ReadyToStart
        )
    }

    /// 是否处于定时测量启用阶段
    pub fn is_measurement_active(&self) -> bool {
        OrderStatus::MEASUREMENT_ACTIVE.contains(self)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 包装方式 (Packaging)
// ==========================================
// 决定单位重量公式:
// - InKg: bag_size 即公斤数
// - InSeeds: bag_size 为千粒数, 单位重量 = bag_size * tkw / 1000
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Packaging {
    InSeeds,
    InKg,
}

impl Packaging {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            Packaging::InSeeds => "IN_SEEDS",
            Packaging::InKg => "IN_KG",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "IN_SEEDS" => Some(Packaging::InSeeds),
            "IN_KG" => Some(Packaging::InKg),
            _ => None,
        }
    }
}

impl fmt::Display for Packaging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 剂量单位 (Rate Unit)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateUnit {
    #[serde(rename = "ML")]
    Ml,
    #[serde(rename = "G")]
    G,
}

impl RateUnit {
    pub fn code(&self) -> &'static str {
        match self {
            RateUnit::Ml => "ML",
            RateUnit::G => "G",
        }
    }

    /// 大小写不敏感;兼容 "mL" / "g" 等写法
    pub fn from_code(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "ML" => Some(RateUnit::Ml),
            "G" => Some(RateUnit::G),
            _ => None,
        }
    }
}

impl fmt::Display for RateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ==========================================
// 剂量基准 (Rate Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateType {
    PerUnit,  // 每单位(袋)
    Per100Kg, // 每 100 kg 种子
}

impl RateType {
    pub fn code(&self) -> &'static str {
        match self {
            RateType::PerUnit => "PER_UNIT",
            RateType::Per100Kg => "PER_100KG",
        }
    }

    pub fn from_code(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "PER_UNIT" | "UNIT" => Some(RateType::PerUnit),
            "PER_100KG" | "PER100KG" => Some(RateType::Per100Kg),
            _ => None,
        }
    }
}

impl fmt::Display for RateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_db_roundtrip_covers_all() {
        for status in OrderStatus::ALL {
            assert_eq!(OrderStatus::from_db_str(status.to_db_str()), Some(status));
        }
        assert_eq!(OrderStatus::from_db_str("Lab To Control"), None);
    }

    #[test]
    fn test_status_groups() {
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Archived.is_terminal());
        assert!(!OrderStatus::PendingAcknowledgement.is_terminal());
        assert!(OrderStatus::ReadyToStart.is_pre_treatment());
        assert!(!OrderStatus::TreatmentInProgress.is_pre_treatment());
        assert!(OrderStatus::PendingLabControl.is_measurement_active());
        assert!(!OrderStatus::PendingAcknowledgement.is_measurement_active());
    }

    #[test]
    fn test_rate_codes_are_lenient() {
        assert_eq!(RateUnit::from_code("mL"), Some(RateUnit::Ml));
        assert_eq!(RateUnit::from_code(" g "), Some(RateUnit::G));
        assert_eq!(RateUnit::from_code("oz"), None);
        assert_eq!(RateType::from_code("per-100kg"), Some(RateType::Per100Kg));
        assert_eq!(RateType::from_code("unit"), Some(RateType::PerUnit));
        assert_eq!(RateType::from_code("per_ha"), None);
    }
}

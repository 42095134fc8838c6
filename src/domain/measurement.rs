// ==========================================
// 种子包衣订单核心 - 测量领域模型
// ==========================================
// 职责: MeasurementSession(订单执行) / ProductExecution(产品施用量) / Measurement(TKW 抽检)
// 生命周期: Measurement 由调度器创建(探测字段为空),
//           外部录入一次探测值后不再修改,永不删除
// ==========================================

use serde::{Deserialize, Serialize};

// ==========================================
// MeasurementSession - 订单执行记录(每订单一条)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSession {
    pub id: String,
    pub order_id: String,
    pub operator_id: Option<String>,
    pub preparation_started_at_ms: Option<i64>,
    pub treatment_started_at_ms: Option<i64>, // 调度器计算陈旧度的基线
    pub treatment_finished_at_ms: Option<i64>,
    pub progress: ExecutionProgress,
}

// ==========================================
// ExecutionProgress - 现场执行进度
// ==========================================
// 保存时为 None 的字段保持原值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProgress {
    pub application_method: Option<String>,
    pub packed_seeds_to_treat_kg: Option<f64>,
    pub slurry_consumption_per_lot_kg: Option<f64>,
    pub current_page: Option<u32>,
    pub current_product_index: Option<u32>,
}

// ==========================================
// ProductExecution - 单产品实际施用量(每执行记录每产品一条)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductExecution {
    pub id: String,
    pub session_id: String,
    pub product_id: String,
    pub applied_quantity: f64,
    pub recorded_at_ms: i64,
}

// ==========================================
// Measurement - 单次 TKW 抽检
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub id: String,
    pub session_id: String,
    pub created_at_ms: i64,
    pub probed_at_ms: Option<i64>,
    pub probes: [Option<f64>; 3],
    pub derived_tkw: Option<f64>,
}

impl Measurement {
    /// 是否已录入探测值
    pub fn is_probed(&self) -> bool {
        self.probed_at_ms.is_some()
    }
}

// ==========================================
// ProbeReading - 外部录入的探测值
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeReading {
    pub probes: [Option<f64>; 3],
}

impl ProbeReading {
    pub fn new(p1: Option<f64>, p2: Option<f64>, p3: Option<f64>) -> Self {
        Self {
            probes: [p1, p2, p3],
        }
    }

    /// 已提供探测值的平均数;全部为空时返回 None
    pub fn mean(&self) -> Option<f64> {
        let values: Vec<f64> = self.probes.iter().flatten().copied().collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }
}

// ==========================================
// ArmedSession - 调度器快照行
// ==========================================
// 由仓储层一次查询得到: 活跃状态订单 + 已开始包衣的执行记录 + 最近一次测量时间
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmedSession {
    pub order_id: String,
    pub company_id: String,
    pub lot_number: String,
    pub session_id: String,
    pub status: crate::domain::types::OrderStatus,
    pub interval_minutes: u32,
    pub treatment_started_at_ms: i64,
    pub last_measurement_at_ms: Option<i64>,
}

/// 快照中无法解码的订单行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedArmedRow {
    pub order_id: String,
    pub reason: String,
}

/// 调度快照: 可调度的执行记录 + 解码失败的订单行(逐行隔离)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArmedSnapshot {
    pub sessions: Vec<ArmedSession>,
    pub malformed: Vec<MalformedArmedRow>,
}

/// 待录入的测量(列表视图)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMeasurement {
    pub order_id: String,
    pub lot_number: String,
    pub measurement: Measurement,
}

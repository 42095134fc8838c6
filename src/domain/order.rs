// ==========================================
// 种子包衣订单核心 - 订单领域模型
// ==========================================
// 职责: Order / ProductDetail / Product 实体
// 红线: Order 独占其 ProductDetail(按 index 排序的值集合,无反向引用)
// 时间字段统一为毫秒级 epoch (i64)
// ==========================================

use crate::domain::types::{OrderStatus, Packaging, RateType, RateUnit};
use serde::{Deserialize, Serialize};

/// 默认 TKW 测量间隔（分钟）
pub const DEFAULT_TKW_MEASUREMENT_INTERVAL_MINUTES: u32 = 60;

// ==========================================
// Product - 包衣产品(药剂)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub active_ingredient: Option<String>,
    pub density: f64, // g/mL
}

// ==========================================
// ProductDetail - 订单产品行
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDetail {
    pub id: String,
    pub index: u32, // 订单内唯一,决定展示与计算顺序
    pub product: Product,
    pub rate: f64,
    pub rate_unit: RateUnit,
    pub rate_type: RateType,
}

// ==========================================
// Order - 包衣订单
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    // ===== 主键与归属 =====
    pub id: String,
    pub lot_number: String,
    pub company_id: String,

    // ===== 状态 =====
    pub status: OrderStatus,
    pub operator_id: Option<String>, // 执行人(首次进入包衣时绑定)

    // ===== TKW(千粒重, g) =====
    pub tkw: Option<f64>,
    pub tkw_reps: [Option<f64>; 3], // 实验室三次重复测量
    pub tkw_measured_at_ms: Option<i64>,

    // ===== 配方输入 =====
    pub seeds_to_treat_kg: f64,
    pub extra_slurry_percent: Option<f64>, // 管路/泵预充损耗比例(%)
    pub packaging: Option<Packaging>,
    pub bag_size: Option<f64>,             // InKg: 公斤; InSeeds: 千粒数

    // ===== 定时测量 =====
    pub tkw_measurement_interval_minutes: u32,

    // ===== 时间戳 =====
    pub created_at_ms: i64,
    pub application_at_ms: Option<i64>, // 进入包衣时间
    pub completed_at_ms: Option<i64>,   // 完成/失败时间

    // ===== 产品行 =====
    pub product_details: Vec<ProductDetail>,
}

impl Order {
    /// 按 index 升序返回产品行
    pub fn sorted_product_details(&self) -> Vec<&ProductDetail> {
        let mut details: Vec<&ProductDetail> = self.product_details.iter().collect();
        details.sort_by_key(|d| d.index);
        details
    }

    /// 测量间隔(毫秒)
    pub fn measurement_interval_ms(&self) -> i64 {
        i64::from(self.tkw_measurement_interval_minutes) * 60_000
    }
}

// ==========================================
// NewOrder - 创建订单入参
// ==========================================
// 剂量单位/基准以外部编码传入,由 API 层解析并报告不支持的组合
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub lot_number: String,
    pub company_id: String,
    pub operator_id: Option<String>,
    pub tkw: Option<f64>,
    pub seeds_to_treat_kg: f64,
    pub extra_slurry_percent: Option<f64>,
    pub packaging: Option<Packaging>,
    pub bag_size: Option<f64>,
    pub tkw_measurement_interval_minutes: Option<u32>,
    pub product_details: Vec<NewProductDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProductDetail {
    pub product_id: String,
    pub index: u32,
    pub rate: f64,
    pub rate_unit: String,
    pub rate_type: String,
}

// ==========================================
// OrderUpdate - 订单定稿入参
// ==========================================
// 为 None 的字段保持原值;产品行整体替换
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub operator_id: Option<String>,
    pub tkw: Option<f64>,
    pub seeds_to_treat_kg: Option<f64>,
    pub extra_slurry_percent: Option<f64>,
    pub packaging: Option<Packaging>,
    pub bag_size: Option<f64>,
    pub tkw_measurement_interval_minutes: Option<u32>,
    pub product_details: Vec<NewProductDetail>,
}

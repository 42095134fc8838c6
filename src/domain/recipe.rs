// ==========================================
// 种子包衣订单核心 - 配方领域模型
// ==========================================
// 职责: ConvertedRates / ProductRecipe / OrderRecipe
// 红线: 配方不可变,重算时整体替换(不做增量修补)
// 不变量: Σ product_recipes.mix_volume_ml == total_mix_volume_ml
// ==========================================

use serde::{Deserialize, Serialize};

// ==========================================
// ConvertedRates - 单产品四种标准剂量表示
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvertedRates {
    pub ml_per_unit: f64,
    pub g_per_unit: f64,
    pub ml_per_100kg: f64,
    pub g_per_100kg: f64,
}

// ==========================================
// ProductRecipe - 单产品配方
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecipe {
    pub product_detail_id: String,
    pub product_name: String,
    pub index: u32,
    pub rates: ConvertedRates,
    pub mix_volume_ml: f64, // 批次需配制体积
    pub mix_mass_g: f64,    // 批次需称量质量
}

// ==========================================
// OrderRecipe - 订单汇总配方
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecipe {
    pub order_id: String,
    pub unit_weight_kg: f64,
    pub total_compounds_density: f64, // Σg_per_unit / Σml_per_unit
    pub slurry_total_ml_per_unit: f64,
    pub slurry_total_g_per_unit: f64,
    pub slurry_total_ml_per_100kg: f64,
    pub slurry_total_g_per_100kg: f64,
    pub total_mix_volume_ml: f64,
    pub total_mix_mass_g: f64,
    pub extra_slurry_priming_ml: f64, // 管路/泵预充体积
    pub nb_units: f64,                // 批次单位(袋)数
    pub product_recipes: Vec<ProductRecipe>,
}

/// 已持久化的配方(带存储元信息)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOrderRecipe {
    pub recipe_id: String,
    pub computed_at_ms: i64,
    pub recipe: OrderRecipe,
}

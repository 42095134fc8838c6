// ==========================================
// 种子包衣订单核心 - 配方计算引擎
// ==========================================
// 职责: 汇总订单内所有产品的剂量换算,得到批次浆液体积/质量
// 输入: Order(含 ProductDetail)
// 输出: OrderRecipe(整体替换旧配方)
// 红线: 纯计算,幂等;前置条件缺失时报错而不是崩溃
// ==========================================
// 计算口径:
// - slurry_basis_kg = seeds_to_treat_kg × (1 + extra_slurry_percent / 100)
// - mix_volume_ml   = ml_per_100kg × slurry_basis_kg / 100
// - mix_mass_g      = mix_volume_ml × density
// ==========================================

use crate::domain::order::Order;
use crate::domain::recipe::{OrderRecipe, ProductRecipe};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::rate_converter::RateConverter;
use tracing::instrument;

// ==========================================
// RecipeEngine - 配方计算引擎
// ==========================================
#[derive(Debug, Default, Clone, Copy)]
pub struct RecipeEngine;

impl RecipeEngine {
    pub fn new() -> Self {
        Self
    }

    /// 计算订单配方
    ///
    /// # 错误
    /// - IncompleteOrderForRecipe: bag_size / tkw / extra_slurry_percent / packaging 缺失
    /// - InvalidConversionInput: 密度或单位重量非正;批量或额外浆液比例为负/非有限值
    /// - DegenerateRecipe: Σml_per_unit 为 0(例如没有产品)
    #[instrument(skip(self, order), fields(order_id = %order.id, products = order.product_details.len()))]
    pub fn compute(&self, order: &Order) -> EngineResult<OrderRecipe> {
        // === 步骤 1: 前置条件 ===
        let mut missing = Vec::new();
        if order.bag_size.is_none() {
            missing.push("bag_size");
        }
        if order.tkw.is_none() {
            missing.push("tkw");
        }
        if order.extra_slurry_percent.is_none() {
            missing.push("extra_slurry_percent");
        }
        if order.packaging.is_none() {
            missing.push("packaging");
        }
        let (Some(bag_size), Some(tkw), Some(extra_pct), Some(packaging)) = (
            order.bag_size,
            order.tkw,
            order.extra_slurry_percent,
            order.packaging,
        ) else {
            return Err(EngineError::IncompleteOrderForRecipe {
                order_id: order.id.clone(),
                missing,
            });
        };

        if !order.seeds_to_treat_kg.is_finite() || order.seeds_to_treat_kg < 0.0 {
            return Err(EngineError::InvalidConversionInput {
                field: "seeds_to_treat_kg",
                value: order.seeds_to_treat_kg,
            });
        }
        if !extra_pct.is_finite() || extra_pct < 0.0 {
            return Err(EngineError::InvalidConversionInput {
                field: "extra_slurry_percent",
                value: extra_pct,
            });
        }

        // === 步骤 2: 单位重量与浆液基准 ===
        let unit_weight_kg = RateConverter::unit_weight_kg(packaging, bag_size, tkw);
        let slurry_basis_kg = order.seeds_to_treat_kg * (1.0 + extra_pct / 100.0);

        // === 步骤 3: 逐产品换算(按 index 顺序) ===
        let mut product_recipes = Vec::with_capacity(order.product_details.len());
        for detail in order.sorted_product_details() {
            let rates = RateConverter::convert(
                detail.rate,
                detail.rate_unit,
                detail.rate_type,
                detail.product.density,
                unit_weight_kg,
            )?;
            let mix_volume_ml = rates.ml_per_100kg * slurry_basis_kg / 100.0;
            product_recipes.push(ProductRecipe {
                product_detail_id: detail.id.clone(),
                product_name: detail.product.name.clone(),
                index: detail.index,
                rates,
                mix_volume_ml,
                mix_mass_g: mix_volume_ml * detail.product.density,
            });
        }

        // === 步骤 4: 汇总 ===
        let sum = |f: fn(&ProductRecipe) -> f64| product_recipes.iter().map(f).sum::<f64>();
        let slurry_total_ml_per_unit = sum(|p| p.rates.ml_per_unit);
        let slurry_total_g_per_unit = sum(|p| p.rates.g_per_unit);
        let slurry_total_ml_per_100kg = sum(|p| p.rates.ml_per_100kg);
        let slurry_total_g_per_100kg = sum(|p| p.rates.g_per_100kg);
        let total_mix_volume_ml = sum(|p| p.mix_volume_ml);
        let total_mix_mass_g = sum(|p| p.mix_mass_g);

        if slurry_total_ml_per_unit == 0.0 {
            return Err(EngineError::DegenerateRecipe {
                reason: format!(
                    "order_id={} 的 Σml_per_unit 为 0 (products={})",
                    order.id,
                    product_recipes.len()
                ),
            });
        }

        let recipe = OrderRecipe {
            order_id: order.id.clone(),
            unit_weight_kg,
            total_compounds_density: slurry_total_g_per_unit / slurry_total_ml_per_unit,
            slurry_total_ml_per_unit,
            slurry_total_g_per_unit,
            slurry_total_ml_per_100kg,
            slurry_total_g_per_100kg,
            total_mix_volume_ml,
            total_mix_mass_g,
            extra_slurry_priming_ml: total_mix_volume_ml * extra_pct / 100.0,
            nb_units: order.seeds_to_treat_kg / unit_weight_kg,
            product_recipes,
        };

        tracing::debug!(
            total_compounds_density = recipe.total_compounds_density,
            total_mix_volume_ml = recipe.total_mix_volume_ml,
            "配方计算完成"
        );

        Ok(recipe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{Product, ProductDetail};
    use crate::domain::types::{OrderStatus, Packaging, RateType, RateUnit};

    fn close(actual: f64, expected: f64) -> bool {
        (actual - expected).abs() <= 1e-2 * expected.abs().max(1.0)
    }

    fn detail(index: u32, name: &str, density: f64, rate: f64, unit: RateUnit, t: RateType) -> ProductDetail {
        ProductDetail {
            id: format!("pd-{}", index),
            index,
            product: Product {
                id: format!("p-{}", index),
                name: name.to_string(),
                active_ingredient: None,
                density,
            },
            rate,
            rate_unit: unit,
            rate_type: t,
        }
    }

    /// 基准算例: 150 千粒/袋, TKW 63 g, 1000 kg, 额外浆液 10%
    fn reference_order() -> Order {
        Order {
            id: "order-ref".to_string(),
            lot_number: "LOT-2024-001".to_string(),
            company_id: "company-1".to_string(),
            status: OrderStatus::ReadyToStart,
            operator_id: None,
            tkw: Some(63.0),
            tkw_reps: [None; 3],
            tkw_measured_at_ms: None,
            seeds_to_treat_kg: 1000.0,
            extra_slurry_percent: Some(10.0),
            packaging: Some(Packaging::InSeeds),
            bag_size: Some(150.0),
            tkw_measurement_interval_minutes: 60,
            created_at_ms: 0,
            application_at_ms: None,
            completed_at_ms: None,
            product_details: vec![
                // 故意乱序,验证按 index 计算
                detail(3, "Cruiser 350 FS", 1.179, 111.0, RateUnit::Ml, RateType::PerUnit),
                detail(0, "Water", 1.000, 270.0, RateUnit::Ml, RateType::Per100Kg),
                detail(1, "Maxim XL 035", 1.040, 500.0, RateUnit::Ml, RateType::Per100Kg),
                detail(2, "Apron XL", 1.100, 300.0, RateUnit::Ml, RateType::Per100Kg),
                detail(4, "Sepiret 6383", 1.390, 500.0, RateUnit::G, RateType::Per100Kg),
            ],
        }
    }

    #[test]
    fn test_reference_recipe_totals() {
        let recipe = RecipeEngine::new().compute(&reference_order()).unwrap();

        assert!(close(recipe.unit_weight_kg, 9.45));
        assert!(close(recipe.total_compounds_density, 1.154));
        assert!(close(recipe.slurry_total_ml_per_unit, 246.1));
        assert!(close(recipe.slurry_total_g_per_unit, 283.96));
        assert!(close(recipe.slurry_total_ml_per_100kg, 2604.3));
        assert!(close(recipe.slurry_total_g_per_100kg, 3004.86));
        assert!(close(recipe.nb_units, 1000.0 / 9.45));

        let indexes: Vec<u32> = recipe.product_recipes.iter().map(|p| p.index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_mix_volume_uses_percentage_basis() {
        let recipe = RecipeEngine::new().compute(&reference_order()).unwrap();
        // 1000 kg × 1.10 = 1100 kg 浆液基准
        let water = &recipe.product_recipes[0];
        assert!(close(water.mix_volume_ml, 270.0 * 1100.0 / 100.0));
        assert!(close(water.mix_mass_g, water.mix_volume_ml * 1.0));

        let sum: f64 = recipe.product_recipes.iter().map(|p| p.mix_volume_ml).sum();
        assert!((sum - recipe.total_mix_volume_ml).abs() < 1e-9);
        assert!(close(recipe.extra_slurry_priming_ml, recipe.total_mix_volume_ml * 0.10));
    }

    #[test]
    fn test_density_identity_holds() {
        let recipe = RecipeEngine::new().compute(&reference_order()).unwrap();
        let g: f64 = recipe.product_recipes.iter().map(|p| p.rates.g_per_unit).sum();
        let ml: f64 = recipe.product_recipes.iter().map(|p| p.rates.ml_per_unit).sum();
        assert_eq!(recipe.total_compounds_density, g / ml);
    }

    #[test]
    fn test_compute_is_idempotent() {
        let order = reference_order();
        let engine = RecipeEngine::new();
        assert_eq!(engine.compute(&order).unwrap(), engine.compute(&order).unwrap());
    }

    #[test]
    fn test_missing_inputs_are_listed() {
        let mut order = reference_order();
        order.tkw = None;
        order.packaging = None;
        match RecipeEngine::new().compute(&order) {
            Err(EngineError::IncompleteOrderForRecipe { missing, .. }) => {
                assert_eq!(missing, vec!["tkw", "packaging"]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_no_products_is_degenerate() {
        let mut order = reference_order();
        order.product_details.clear();
        assert!(matches!(
            RecipeEngine::new().compute(&order),
            Err(EngineError::DegenerateRecipe { .. })
        ));
    }

    #[test]
    fn test_zero_bag_size_is_rejected_before_division() {
        let mut order = reference_order();
        order.bag_size = Some(0.0);
        assert!(matches!(
            RecipeEngine::new().compute(&order),
            Err(EngineError::InvalidConversionInput { field: "unit_weight_kg", .. })
        ));
    }

    #[test]
    fn test_bad_extra_slurry_percent_is_rejected() {
        for bad in [-5.0, f64::NAN, f64::INFINITY] {
            let mut order = reference_order();
            order.extra_slurry_percent = Some(bad);
            assert!(matches!(
                RecipeEngine::new().compute(&order),
                Err(EngineError::InvalidConversionInput { field: "extra_slurry_percent", .. })
            ));
        }
    }
}

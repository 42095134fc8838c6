// ==========================================
// 种子包衣订单核心 - 剂量换算核心
// ==========================================
// 职责: 单产品剂量在 {mL, g} × {每单位, 每100kg} 四种表示间换算
// 红线: 纯函数,无 IO;除零前先校验输入
// ==========================================
// 换算关系:
// - g = mL × density
// - per_unit = per_100kg × unit_weight_kg / 100
// ==========================================

use crate::domain::recipe::ConvertedRates;
use crate::domain::types::{Packaging, RateType, RateUnit};
use crate::engine::error::{EngineError, EngineResult};

pub struct RateConverter;

impl RateConverter {
    /// 单位重量(kg)
    ///
    /// - InKg: bag_size
    /// - InSeeds: bag_size(千粒) × tkw(g/千粒) / 1000
    pub fn unit_weight_kg(packaging: Packaging, bag_size: f64, tkw: f64) -> f64 {
        match packaging {
            Packaging::InKg => bag_size,
            Packaging::InSeeds => bag_size * tkw / 1000.0,
        }
    }

    /// 解析外部剂量编码
    ///
    /// 未知的单位/基准组合直接报错,不回退为 0
    pub fn parse_rate_spec(unit: &str, rate_type: &str) -> EngineResult<(RateUnit, RateType)> {
        match (RateUnit::from_code(unit), RateType::from_code(rate_type)) {
            (Some(u), Some(t)) => Ok((u, t)),
            _ => Err(EngineError::UnsupportedRateSpecification {
                unit: unit.to_string(),
                rate_type: rate_type.to_string(),
            }),
        }
    }

    /// 换算单产品剂量
    ///
    /// 四个输出中恰有一个直接取自输入,其余三个经 density / unit_weight 推导
    pub fn convert(
        rate: f64,
        rate_unit: RateUnit,
        rate_type: RateType,
        density: f64,
        unit_weight_kg: f64,
    ) -> EngineResult<ConvertedRates> {
        Self::check_inputs(rate, density, unit_weight_kg)?;

        let per_unit_from_100kg = |per_100kg: f64| per_100kg * unit_weight_kg / 100.0;
        let per_100kg_from_unit = |per_unit: f64| per_unit * 100.0 / unit_weight_kg;

        let rates = match (rate_unit, rate_type) {
            (RateUnit::Ml, RateType::PerUnit) => {
                let ml_per_unit = rate;
                let ml_per_100kg = per_100kg_from_unit(ml_per_unit);
                ConvertedRates {
                    ml_per_unit,
                    g_per_unit: ml_per_unit * density,
                    ml_per_100kg,
                    g_per_100kg: ml_per_100kg * density,
                }
            }
            (RateUnit::Ml, RateType::Per100Kg) => {
                let ml_per_100kg = rate;
                let ml_per_unit = per_unit_from_100kg(ml_per_100kg);
                ConvertedRates {
                    ml_per_unit,
                    g_per_unit: ml_per_unit * density,
                    ml_per_100kg,
                    g_per_100kg: ml_per_100kg * density,
                }
            }
            (RateUnit::G, RateType::PerUnit) => {
                let g_per_unit = rate;
                let g_per_100kg = per_100kg_from_unit(g_per_unit);
                ConvertedRates {
                    ml_per_unit: g_per_unit / density,
                    g_per_unit,
                    ml_per_100kg: g_per_100kg / density,
                    g_per_100kg,
                }
            }
            (RateUnit::G, RateType::Per100Kg) => {
                let g_per_100kg = rate;
                let g_per_unit = per_unit_from_100kg(g_per_100kg);
                ConvertedRates {
                    ml_per_unit: g_per_unit / density,
                    g_per_unit,
                    ml_per_100kg: g_per_100kg / density,
                    g_per_100kg,
                }
            }
        };

        Ok(rates)
    }

    fn check_inputs(rate: f64, density: f64, unit_weight_kg: f64) -> EngineResult<()> {
        if !density.is_finite() || density <= 0.0 {
            return Err(EngineError::InvalidConversionInput {
                field: "density",
                value: density,
            });
        }
        if !unit_weight_kg.is_finite() || unit_weight_kg <= 0.0 {
            return Err(EngineError::InvalidConversionInput {
                field: "unit_weight_kg",
                value: unit_weight_kg,
            });
        }
        if !rate.is_finite() || rate < 0.0 {
            return Err(EngineError::InvalidConversionInput {
                field: "rate",
                value: rate,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT_WEIGHT: f64 = 9.45; // 150 千粒 × 63 g / 1000
    const EPS: f64 = 1e-9;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() <= EPS * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn test_unit_weight_by_packaging() {
        assert!(approx(RateConverter::unit_weight_kg(Packaging::InSeeds, 150.0, 63.0), 9.45));
        assert!(approx(RateConverter::unit_weight_kg(Packaging::InKg, 25.0, 63.0), 25.0));
    }

    #[test]
    fn test_ml_per_100kg_passthrough() {
        let r = RateConverter::convert(500.0, RateUnit::Ml, RateType::Per100Kg, 1.04, UNIT_WEIGHT)
            .unwrap();
        assert!(approx(r.ml_per_100kg, 500.0));
        assert!(approx(r.g_per_100kg, 520.0));
        assert!(approx(r.ml_per_unit, 47.25));
        assert!(approx(r.g_per_unit, 49.14));
    }

    #[test]
    fn test_ml_per_unit_uses_unit_weight_identity() {
        let r = RateConverter::convert(111.0, RateUnit::Ml, RateType::PerUnit, 1.179, UNIT_WEIGHT)
            .unwrap();
        assert!(approx(r.ml_per_unit, 111.0));
        assert!(approx(r.ml_per_100kg * UNIT_WEIGHT / 100.0, r.ml_per_unit));
        assert!(approx(r.g_per_unit, 111.0 * 1.179));
    }

    #[test]
    fn test_g_inputs_divide_by_density() {
        let r = RateConverter::convert(500.0, RateUnit::G, RateType::Per100Kg, 1.39, UNIT_WEIGHT)
            .unwrap();
        assert!(approx(r.g_per_100kg, 500.0));
        assert!(approx(r.ml_per_100kg, 500.0 / 1.39));
        assert!(approx(r.g_per_unit, 47.25));

        let r = RateConverter::convert(20.0, RateUnit::G, RateType::PerUnit, 2.0, UNIT_WEIGHT)
            .unwrap();
        assert!(approx(r.ml_per_unit, 10.0));
        assert!(approx(r.g_per_100kg, 20.0 * 100.0 / UNIT_WEIGHT));
    }

    #[test]
    fn test_every_pair_is_self_consistent() {
        let density = 1.179;
        for unit in [RateUnit::Ml, RateUnit::G] {
            for rate_type in [RateType::PerUnit, RateType::Per100Kg] {
                let r = RateConverter::convert(123.4, unit, rate_type, density, UNIT_WEIGHT).unwrap();
                // mL → g → mL
                assert!(approx(r.g_per_unit / density, r.ml_per_unit));
                assert!(approx(r.g_per_100kg / density, r.ml_per_100kg));
                // 每单位 ↔ 每100kg
                assert!(approx(r.ml_per_100kg * UNIT_WEIGHT / 100.0, r.ml_per_unit));
                assert!(approx(r.g_per_100kg * UNIT_WEIGHT / 100.0, r.g_per_unit));
            }
        }
    }

    #[test]
    fn test_rejects_non_positive_density_and_unit_weight() {
        let err = RateConverter::convert(1.0, RateUnit::Ml, RateType::PerUnit, 0.0, UNIT_WEIGHT)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConversionInput { field: "density", .. }));

        let err = RateConverter::convert(1.0, RateUnit::G, RateType::Per100Kg, 1.0, -2.0)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConversionInput { field: "unit_weight_kg", .. }));

        let err = RateConverter::convert(f64::NAN, RateUnit::G, RateType::Per100Kg, 1.0, 1.0)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConversionInput { field: "rate", .. }));
    }

    #[test]
    fn test_parse_rate_spec_rejects_unknown_pair() {
        assert_eq!(
            RateConverter::parse_rate_spec("mL", "PER_100KG").unwrap(),
            (RateUnit::Ml, RateType::Per100Kg)
        );
        let err = RateConverter::parse_rate_spec("L", "PER_UNIT").unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedRateSpecification { .. }));
    }
}

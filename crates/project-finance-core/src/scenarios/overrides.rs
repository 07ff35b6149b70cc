//! Parameter overrides.
//!
//! A sensitivity scenario is a set of overrides, each targeting one model
//! parameter with a multiplier, an additive delta, or (for rate-like
//! parameters) a basis-point shift. Overrides are applied to a cloned copy
//! of the base inputs, so the base is never mutated and scenarios cannot
//! see each other.

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::types::{AssetRecord, PeriodSeries};
use crate::ModelResult;

/// Parameter a single override targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterPath {
    /// Every period's revenue line, all assets
    Revenue,
    /// Every period's operating cost line
    Opex,
    /// Every period's capital expenditure line
    Capex,
    /// The annual cost of debt in every asset's financing terms
    InterestRate,
    /// The sizing DSCR target
    TargetDscr,
    /// The gearing cap
    MaxGearing,
}

impl ParameterPath {
    fn is_rate_like(&self) -> bool {
        matches!(self, ParameterPath::InterestRate | ParameterPath::MaxGearing)
    }
}

impl fmt::Display for ParameterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParameterPath::Revenue => "revenue",
            ParameterPath::Opex => "opex",
            ParameterPath::Capex => "capex",
            ParameterPath::InterestRate => "interest_rate",
            ParameterPath::TargetDscr => "target_dscr",
            ParameterPath::MaxGearing => "max_gearing",
        };
        f.write_str(s)
    }
}

/// How the targeted value is perturbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Adjustment {
    /// Scale the base value (1.10 = +10%)
    Multiplier(Decimal),
    /// Add to the base value
    Delta(Decimal),
    /// Add basis points; valid for rate-like parameters only
    BasisPoints(Decimal),
}

/// One parameter perturbation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Override {
    pub path: ParameterPath,
    pub adjustment: Adjustment,
}

impl Override {
    fn value(&self) -> Decimal {
        match self.adjustment {
            Adjustment::Multiplier(v) | Adjustment::Delta(v) | Adjustment::BasisPoints(v) => v,
        }
    }

    fn apply_to(&self, base: Decimal) -> Decimal {
        match self.adjustment {
            Adjustment::Multiplier(m) => base * m,
            Adjustment::Delta(d) => base + d,
            Adjustment::BasisPoints(bps) => base + bps / dec!(10000),
        }
    }
}

/// Deterministic scenario id: `"{path}={value}"` terms joined with `&` in
/// sorted path order, so the same override set always maps to the same id
/// regardless of construction order.
pub fn scenario_id(overrides: &[Override]) -> String {
    let mut parts: Vec<(ParameterPath, String)> = overrides
        .iter()
        .map(|o| (o.path, format!("{}={}", o.path, o.value().normalize())))
        .collect();
    parts.sort_by_key(|(path, _)| *path);
    parts
        .into_iter()
        .map(|(_, part)| part)
        .collect::<Vec<_>>()
        .join("&")
}

/// Apply every override in place. Callers pass clones of the base inputs.
pub fn apply_overrides(
    overrides: &[Override],
    assets: &mut [AssetRecord],
    series: &mut [PeriodSeries],
) -> ModelResult<()> {
    for o in overrides {
        if matches!(o.adjustment, Adjustment::BasisPoints(_)) && !o.path.is_rate_like() {
            return Err(ModelError::InvalidInput {
                field: o.path.to_string(),
                reason: "Basis-point adjustments apply to rate-like parameters only".into(),
            });
        }

        match o.path {
            ParameterPath::Revenue => {
                for s in series.iter_mut() {
                    for r in &mut s.records {
                        r.revenue = o.apply_to(r.revenue);
                    }
                }
            }
            ParameterPath::Opex => {
                for s in series.iter_mut() {
                    for r in &mut s.records {
                        r.opex = o.apply_to(r.opex);
                    }
                }
            }
            ParameterPath::Capex => {
                for s in series.iter_mut() {
                    for r in &mut s.records {
                        r.capex = o.apply_to(r.capex);
                    }
                }
            }
            ParameterPath::InterestRate => {
                for a in assets.iter_mut() {
                    a.financing.interest_rate = o.apply_to(a.financing.interest_rate);
                }
            }
            ParameterPath::TargetDscr => {
                for a in assets.iter_mut() {
                    a.financing.target_dscr = o.apply_to(a.financing.target_dscr);
                }
            }
            ParameterPath::MaxGearing => {
                for a in assets.iter_mut() {
                    a.financing.max_gearing = o.apply_to(a.financing.max_gearing);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    use crate::periods::{Granularity, PeriodKey};
    use crate::types::{FinancingTerms, PeriodRecord, SizingMode};

    fn sample_asset() -> AssetRecord {
        AssetRecord {
            id: 1,
            name: "solar-1".to_string(),
            asset_type: "solar".to_string(),
            capacity_mw: dec!(50),
            hybrid_group: None,
            operating_start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            lifetime_years: 25,
            financing: FinancingTerms {
                interest_rate: dec!(0.06),
                tenor_years: 10,
                target_dscr: dec!(1.30),
                dscr_floor: None,
                max_gearing: dec!(0.80),
                sizing_mode: SizingMode::Sculpted,
            },
        }
    }

    fn sample_series() -> PeriodSeries {
        PeriodSeries {
            asset_id: 1,
            granularity: Granularity::Yearly,
            records: vec![PeriodRecord {
                period: PeriodKey(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()),
                revenue: dec!(100),
                opex: dec!(20),
                capex: dec!(0),
                depreciation: dec!(0),
                tax: None,
            }],
        }
    }

    #[test]
    fn test_multiplier_and_delta_on_series_columns() {
        let mut assets = vec![sample_asset()];
        let mut series = vec![sample_series()];
        apply_overrides(
            &[
                Override {
                    path: ParameterPath::Revenue,
                    adjustment: Adjustment::Multiplier(dec!(1.10)),
                },
                Override {
                    path: ParameterPath::Opex,
                    adjustment: Adjustment::Delta(dec!(5)),
                },
            ],
            &mut assets,
            &mut series,
        )
        .unwrap();
        assert_eq!(series[0].records[0].revenue, dec!(110));
        assert_eq!(series[0].records[0].opex, dec!(25));
    }

    #[test]
    fn test_basis_points_on_interest_rate() {
        let mut assets = vec![sample_asset()];
        let mut series = vec![sample_series()];
        apply_overrides(
            &[Override {
                path: ParameterPath::InterestRate,
                adjustment: Adjustment::BasisPoints(dec!(50)),
            }],
            &mut assets,
            &mut series,
        )
        .unwrap();
        assert_eq!(assets[0].financing.interest_rate, dec!(0.065));
    }

    #[test]
    fn test_basis_points_rejected_on_value_paths() {
        let mut assets = vec![sample_asset()];
        let mut series = vec![sample_series()];
        let result = apply_overrides(
            &[Override {
                path: ParameterPath::Revenue,
                adjustment: Adjustment::BasisPoints(dec!(50)),
            }],
            &mut assets,
            &mut series,
        );
        assert!(matches!(result, Err(ModelError::InvalidInput { .. })));
    }

    #[test]
    fn test_scenario_id_is_order_independent() {
        let a = Override {
            path: ParameterPath::Revenue,
            adjustment: Adjustment::Multiplier(dec!(0.90)),
        };
        let b = Override {
            path: ParameterPath::InterestRate,
            adjustment: Adjustment::BasisPoints(dec!(100)),
        };
        assert_eq!(scenario_id(&[a, b]), scenario_id(&[b, a]));
        assert_eq!(scenario_id(&[a, b]), "revenue=0.9&interest_rate=100");
    }
}

//! Senior tranche sizing.
//!
//! Two candidate principals are considered: the largest amount the cash
//! flows can amortize over the tenor while holding the target DSCR
//! (coverage), and the gearing cap on total CAPEX (leverage). The binding
//! constraint is the smaller of the two and is reported on the outcome.
//!
//! The coverage capacity is found by bisection on the principal: a
//! candidate is feasible when the sculpted schedule built from the
//! period-by-period service caps (CFADS / target DSCR) fully repays the
//! balance within the tenor. Feasibility is monotone in the principal, so
//! the bisection converges to the largest feasible amount.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::debt::amortization::{
    annuity_schedule, final_balance, reconcile, sculpted_schedule,
};
use crate::error::ModelError;
use crate::periods::{periodic_rate, Granularity};
use crate::types::{
    AmortizationEntry, BindingConstraint, DebtTranche, FinancingTerms, ModelConfig, Money,
    SizingMode,
};
use crate::ModelResult;

/// Result of sizing one asset's senior tranche. Both candidate principals
/// are reported alongside the one that bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingOutcome {
    pub tranche: DebtTranche,
    pub schedule: Vec<AmortizationEntry>,
    pub binding_constraint: BindingConstraint,
    /// PV of the per-period service caps at the periodic rate
    pub coverage_candidate: Money,
    /// maxGearing x CAPEX
    pub leverage_candidate: Money,
    pub warnings: Vec<String>,
}

/// Size the senior tranche for one asset against its pre-financing cash
/// flows.
///
/// `cfads` holds one entry per debt-service period starting at the first
/// period of operations, at the given `granularity`. A window shorter than
/// the tenor shortens the effective tenor with a warning; zero capacity over
/// the window is a sizing error.
pub fn size_debt(
    asset_name: &str,
    terms: &FinancingTerms,
    total_capex: Money,
    cfads: &[Money],
    granularity: Granularity,
    config: &ModelConfig,
) -> ModelResult<SizingOutcome> {
    validate_terms(asset_name, terms, total_capex)?;

    let mut warnings: Vec<String> = Vec::new();

    let rate = periodic_rate(terms.interest_rate, granularity);
    let full_tenor = terms.tenor_years * granularity.periods_per_year();

    if cfads.is_empty() {
        return Err(ModelError::InsufficientData(format!(
            "No cash flow periods available to size debt for {asset_name}"
        )));
    }
    let tenor_periods = if cfads.len() < full_tenor as usize {
        warnings.push(format!(
            "Cash flow window for {asset_name} covers {} of {} tenor periods; sizing over the shorter window",
            cfads.len(),
            full_tenor
        ));
        cfads.len() as u32
    } else {
        full_tenor
    };
    let window = &cfads[..tenor_periods as usize];

    if window.iter().any(|c| *c < Decimal::ZERO) {
        warnings.push(format!(
            "Negative CFADS periods inside the debt tenor for {asset_name}; those periods carry zero debt capacity"
        ));
    }

    // Period-by-period debt service caps that hold the DSCR at target
    let service_caps: Vec<Money> = window
        .iter()
        .map(|c| (*c).max(Decimal::ZERO) / terms.target_dscr)
        .collect();

    let gearing_cap = terms.max_gearing * total_capex;
    let tolerance = config.sizing_tolerance * total_capex.max(Decimal::ONE);

    // Closed-form coverage anchor: PV of the caps, first cap one period out
    let mut discounted_caps = Vec::with_capacity(service_caps.len() + 1);
    discounted_caps.push(Decimal::ZERO);
    discounted_caps.extend_from_slice(&service_caps);
    let coverage_candidate = crate::time_value::npv(rate, &discounted_caps)?;

    let (principal, schedule, binding_constraint) = match terms.sizing_mode {
        SizingMode::Sculpted => {
            size_sculpted(asset_name, rate, &service_caps, gearing_cap, tolerance, config)?
        }
        SizingMode::Annuity => {
            let schedule = annuity_schedule(gearing_cap, rate, tenor_periods)?;
            (gearing_cap, schedule, BindingConstraint::Leverage)
        }
    };

    if (schedule.len() as u32) < tenor_periods {
        warnings.push(format!(
            "Debt for {asset_name} fully repays in period {} of {}",
            schedule.len(),
            tenor_periods
        ));
    }

    let closure_tolerance = config.amortization_tolerance * total_capex.max(Decimal::ONE);
    reconcile(&schedule, asset_name, Decimal::ZERO, closure_tolerance)?;

    let min_dscr = realized_min_dscr(window, &schedule).ok_or_else(|| ModelError::Sizing {
        asset: asset_name.to_string(),
        reason: "Schedule carries no debt service periods".into(),
    })?;

    // Small slack so closure rounding on the final repayment does not
    // read as a shortfall.
    if min_dscr < terms.target_dscr - dec!(0.0001) {
        warnings.push(format!(
            "Minimum realized DSCR {min_dscr:.4} is below the sizing target {:.4} for {asset_name}",
            terms.target_dscr
        ));
    }
    if let Some(floor) = terms.dscr_floor {
        if min_dscr < floor {
            warnings.push(format!(
                "Covenant breach: minimum DSCR {min_dscr:.4} is below the floor {floor:.4} for {asset_name}"
            ));
        }
    }

    Ok(SizingOutcome {
        tranche: DebtTranche {
            principal,
            tenor_periods,
            periodic_rate: rate,
            target_dscr: terms.target_dscr,
            max_gearing: terms.max_gearing,
            min_dscr,
        },
        schedule,
        binding_constraint,
        coverage_candidate,
        leverage_candidate: gearing_cap,
        warnings,
    })
}

/// Bisection on the principal against sculpted-schedule feasibility.
fn size_sculpted(
    asset_name: &str,
    rate: Decimal,
    service_caps: &[Money],
    gearing_cap: Money,
    tolerance: Decimal,
    config: &ModelConfig,
) -> ModelResult<(Money, Vec<AmortizationEntry>, BindingConstraint)> {
    if service_caps.iter().all(|c| c.is_zero()) {
        return Err(ModelError::Sizing {
            asset: asset_name.to_string(),
            reason: "No positive cash flow inside the tenor; debt capacity is zero".into(),
        });
    }

    // Feasible means the schedule fully repays within the tenor AND no
    // period with positive capacity sees interest alone exceed its cap.
    // Zero-capacity periods (non-positive CFADS) stay warn-only; a breach
    // there is a covenant matter, not a sizing constraint.
    let feasible = |principal: Money| -> bool {
        let schedule = sculpted_schedule(principal, rate, service_caps);
        if final_balance(&schedule).abs() > tolerance {
            return false;
        }
        schedule.iter().all(|row| {
            let cap = service_caps[(row.period - 1) as usize];
            cap.is_zero() || row.interest <= cap + tolerance
        })
    };

    let (mut low, mut high) = (Decimal::ZERO, gearing_cap);
    let binding = if feasible(gearing_cap) {
        low = gearing_cap;
        BindingConstraint::Leverage
    } else {
        let mut converged = false;
        for _ in 0..config.sizing_max_iterations {
            let mid = (low + high) / Decimal::TWO;
            if feasible(mid) {
                low = mid;
            } else {
                high = mid;
            }
            if high - low <= tolerance {
                converged = true;
                break;
            }
        }
        if !converged {
            return Err(ModelError::ConvergenceFailure {
                function: format!("debt sizing for {asset_name}"),
                iterations: config.sizing_max_iterations,
                last_delta: high - low,
            });
        }
        BindingConstraint::Coverage
    };

    let principal = low;
    if principal <= tolerance {
        return Err(ModelError::Sizing {
            asset: asset_name.to_string(),
            reason: "Cash flows cannot support any debt at the target DSCR".into(),
        });
    }

    let mut schedule = sculpted_schedule(principal, rate, service_caps);

    // Fold the bisection residual into the last repayment so the tranche
    // closes to exactly zero.
    let residual = final_balance(&schedule);
    if residual.abs() <= tolerance {
        if let Some(last) = schedule.last_mut() {
            last.principal += residual;
            last.closing_balance = Decimal::ZERO;
        }
    } else {
        return Err(ModelError::Reconciliation {
            asset: asset_name.to_string(),
            final_balance: residual,
            tolerance,
        });
    }

    Ok((principal, schedule, binding))
}

/// Minimum DSCR across schedule periods that carry debt service.
fn realized_min_dscr(cfads: &[Money], schedule: &[AmortizationEntry]) -> Option<Decimal> {
    schedule
        .iter()
        .filter(|row| row.debt_service() > Decimal::ZERO)
        .filter_map(|row| {
            cfads
                .get((row.period - 1) as usize)
                .map(|c| c / row.debt_service())
        })
        .min()
}

/// Revenue-mix weighted target DSCR: lenders price contracted revenue at a
/// tighter coverage than merchant revenue, so the blended target is the
/// share-weighted average of the two.
pub fn blended_dscr(
    contracted_share: Decimal,
    contracted_dscr: Decimal,
    merchant_dscr: Decimal,
) -> ModelResult<Decimal> {
    if contracted_share < Decimal::ZERO || contracted_share > Decimal::ONE {
        return Err(ModelError::InvalidInput {
            field: "contracted_share".into(),
            reason: "Contracted revenue share must be in [0, 1]".into(),
        });
    }
    Ok(contracted_share * contracted_dscr + (Decimal::ONE - contracted_share) * merchant_dscr)
}

fn validate_terms(asset_name: &str, terms: &FinancingTerms, total_capex: Money) -> ModelResult<()> {
    if total_capex <= Decimal::ZERO {
        return Err(ModelError::InvalidInput {
            field: "total_capex".into(),
            reason: format!("CAPEX must be positive to size debt for {asset_name}"),
        });
    }
    if terms.tenor_years == 0 {
        return Err(ModelError::InvalidInput {
            field: "tenor_years".into(),
            reason: "Debt tenor must be at least one year".into(),
        });
    }
    if terms.target_dscr <= Decimal::ZERO {
        return Err(ModelError::InvalidInput {
            field: "target_dscr".into(),
            reason: "Target DSCR must be positive".into(),
        });
    }
    if terms.max_gearing <= Decimal::ZERO || terms.max_gearing > Decimal::ONE {
        return Err(ModelError::InvalidInput {
            field: "max_gearing".into(),
            reason: "Maximum gearing must be in (0, 1]".into(),
        });
    }
    if terms.interest_rate < Decimal::ZERO {
        return Err(ModelError::InvalidInput {
            field: "interest_rate".into(),
            reason: "Interest rate cannot be negative".into(),
        });
    }
    Ok(())
}

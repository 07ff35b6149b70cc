use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;

use crate::error::ModelError;
use crate::periods::year_fraction;
use crate::types::{ModelConfig, Money, Rate};
use crate::ModelResult;

/// Halvings available to the bisection fallback. Independent of the Newton
/// iteration cap so the fallback stays usable when Newton is throttled.
const BISECTION_MAX_ITERATIONS: u32 = 200;

/// Net Present Value of a series of equally spaced cash flows
pub fn npv(rate: Rate, cash_flows: &[Money]) -> ModelResult<Money> {
    if rate <= dec!(-1) {
        return Err(ModelError::InvalidInput {
            field: "rate".into(),
            reason: "Discount rate must be greater than -100%".into(),
        });
    }

    let mut result = Decimal::ZERO;
    let one_plus_r = Decimal::ONE + rate;
    let mut discount = Decimal::ONE;

    for (t, cf) in cash_flows.iter().enumerate() {
        if t > 0 {
            // Once the discount factor leaves representable range the
            // remaining terms are negligible
            discount = match discount.checked_mul(one_plus_r) {
                Some(d) => d,
                None => break,
            };
        }
        let term = cf.checked_div(discount).ok_or_else(|| ModelError::DivisionByZero {
            context: format!("NPV discount factor at period {t}"),
        })?;
        result += term;
    }

    Ok(result)
}

/// NPV of irregularly dated flows discounted on a 365.25-day basis from the
/// first flow's date.
///
/// A rate so close to -100% that a flow's discounted value exceeds the
/// numeric range is an error rather than a panic; discount factors beyond
/// representable range make their terms negligible and are skipped.
pub fn xnpv(rate: Rate, dated_flows: &[(NaiveDate, Money)]) -> ModelResult<Money> {
    if dated_flows.is_empty() {
        return Ok(Decimal::ZERO);
    }
    let one_plus_r = Decimal::ONE + rate;
    if one_plus_r <= Decimal::ZERO {
        return Err(ModelError::InvalidInput {
            field: "rate".into(),
            reason: "Discount rate must be greater than -100%".into(),
        });
    }

    let base_date = dated_flows[0].0;
    let mut result = Decimal::ZERO;

    for (date, amount) in dated_flows {
        let years = year_fraction(base_date, *date);
        let discount = match one_plus_r.checked_powd(years) {
            Some(d) if !d.is_zero() => d,
            _ => continue,
        };
        let term = amount.checked_div(discount).ok_or_else(|| ModelError::DivisionByZero {
            context: format!("discount factor at rate {rate} below representable precision"),
        })?;
        result = result.checked_add(term).ok_or_else(|| ModelError::DivisionByZero {
            context: format!("NPV accumulation overflow at rate {rate}"),
        })?;
    }

    Ok(result)
}

/// Equity IRR over irregularly dated flows.
///
/// Newton-Raphson from `config.irr_guess`; if that fails to converge or
/// diverges, falls back to bisection over
/// `[config.irr_domain_low, config.irr_domain_high]`, which requires an NPV
/// sign change across the domain. Where the NPV has several roots, the
/// first one bracketed by the bounded search is returned; that is a policy
/// choice, not a uniqueness guarantee.
pub fn xirr(dated_flows: &[(NaiveDate, Money)], config: &ModelConfig) -> ModelResult<Rate> {
    if dated_flows.len() < 2 {
        return Err(ModelError::InsufficientData(
            "XIRR requires at least 2 cash flows".into(),
        ));
    }

    // A root can only exist with flows of both signs.
    let has_positive = dated_flows.iter().any(|(_, cf)| *cf > Decimal::ZERO);
    let has_negative = dated_flows.iter().any(|(_, cf)| *cf < Decimal::ZERO);
    if !has_positive || !has_negative {
        return Err(ModelError::NoRoot {
            function: "XIRR".into(),
            low: config.irr_domain_low,
            high: config.irr_domain_high,
        });
    }

    let mut flows = dated_flows.to_vec();
    flows.sort_by_key(|(date, _)| *date);

    match newton_xirr(&flows, config) {
        Ok(rate) => Ok(rate),
        Err(ModelError::ConvergenceFailure { .. }) => bisect_xirr(&flows, config),
        Err(e) => Err(e),
    }
}

fn newton_xirr(flows: &[(NaiveDate, Money)], config: &ModelConfig) -> ModelResult<Rate> {
    let base_date = flows[0].0;
    let mut rate = config.irr_guess;

    for i in 0..config.irr_max_iterations {
        let mut npv_val = Decimal::ZERO;
        let mut dnpv = Decimal::ZERO;
        let one_plus_r = Decimal::ONE + rate;

        if one_plus_r <= Decimal::ZERO {
            return Err(ModelError::ConvergenceFailure {
                function: "XIRR".into(),
                iterations: i,
                last_delta: npv_val,
            });
        }

        for (date, amount) in flows {
            let years = year_fraction(base_date, *date);
            let discount = match one_plus_r.checked_powd(years) {
                Some(d) if !d.is_zero() => d,
                _ => continue,
            };
            // An unrepresentable quotient means this rate is unusable;
            // hand off to the bracketed fallback
            let term = match amount.checked_div(discount) {
                Some(t) => t,
                None => {
                    return Err(ModelError::ConvergenceFailure {
                        function: "XIRR".into(),
                        iterations: i,
                        last_delta: npv_val,
                    })
                }
            };
            npv_val += term;
            if let Some(denominator) = one_plus_r.checked_mul(discount) {
                if !denominator.is_zero() {
                    if let Some(slope) = (years * amount).checked_div(denominator) {
                        dnpv -= slope;
                    }
                }
            }
        }

        if npv_val.abs() < config.irr_tolerance {
            return Ok(rate);
        }

        if dnpv.is_zero() {
            return Err(ModelError::ConvergenceFailure {
                function: "XIRR".into(),
                iterations: i,
                last_delta: npv_val,
            });
        }

        rate -= npv_val / dnpv;

        if rate < config.irr_domain_low {
            rate = config.irr_domain_low;
        } else if rate > dec!(100.0) {
            rate = dec!(100.0);
        }
    }

    Err(ModelError::ConvergenceFailure {
        function: "XIRR".into(),
        iterations: config.irr_max_iterations,
        last_delta: xnpv(rate, flows).unwrap_or(Decimal::MAX),
    })
}

/// Bisection fallback. Walks a fixed ladder of seed rates to bracket a
/// sign change, then halves the bracket until the NPV is within tolerance.
/// Seed rates where the NPV is not evaluable (discounting overflow near
/// the domain edge) are skipped rather than fatal.
fn bisect_xirr(flows: &[(NaiveDate, Money)], config: &ModelConfig) -> ModelResult<Rate> {
    let seed_rates = [
        config.irr_domain_low,
        dec!(-0.5),
        dec!(-0.1),
        Decimal::ZERO,
        dec!(0.1),
        dec!(0.5),
        dec!(1.0),
        dec!(5.0),
        config.irr_domain_high,
    ];

    let mut bracket: Option<(Rate, Rate, Money)> = None;
    let mut prev: Option<(Rate, Money)> = None;
    for rate in seed_rates {
        if rate < config.irr_domain_low || rate > config.irr_domain_high {
            continue;
        }
        let value = match xnpv(rate, flows) {
            Ok(v) => v,
            Err(_) => continue,
        };
        if value.abs() < config.irr_tolerance {
            return Ok(rate);
        }
        if let Some((prev_rate, prev_value)) = prev {
            if prev_value.is_sign_negative() != value.is_sign_negative() {
                bracket = Some((prev_rate, rate, prev_value));
                break;
            }
        }
        prev = Some((rate, value));
    }

    let (mut low, mut high, mut low_value) = match bracket {
        Some(b) => b,
        None => {
            return Err(ModelError::NoRoot {
                function: "XIRR".into(),
                low: config.irr_domain_low,
                high: config.irr_domain_high,
            })
        }
    };

    let mut last_value = low_value;
    for _ in 0..BISECTION_MAX_ITERATIONS {
        let mid = (low + high) / dec!(2);
        let mid_value = xnpv(mid, flows)?;
        last_value = mid_value;

        if mid_value.abs() < config.irr_tolerance || (high - low).abs() < config.irr_tolerance {
            return Ok(mid);
        }

        if low_value.is_sign_negative() != mid_value.is_sign_negative() {
            high = mid;
        } else {
            low = mid;
            low_value = mid_value;
        }
    }

    Err(ModelError::ConvergenceFailure {
        function: "XIRR bisection".into(),
        iterations: BISECTION_MAX_ITERATIONS,
        last_delta: last_value,
    })
}

/// Payment (PMT)
pub fn pmt(rate: Rate, nper: u32, present_value: Money, future_value: Money) -> ModelResult<Money> {
    if nper == 0 {
        return Err(ModelError::InvalidInput {
            field: "nper".into(),
            reason: "Number of periods must be > 0".into(),
        });
    }

    if rate.is_zero() {
        return Ok(-(present_value + future_value) / Decimal::from(nper));
    }

    let one_plus_r = Decimal::ONE + rate;
    let factor = one_plus_r.powd(Decimal::from(nper));
    let annuity_factor = (factor - Decimal::ONE) / rate;

    if annuity_factor.is_zero() {
        return Err(ModelError::DivisionByZero {
            context: "PMT annuity factor".into(),
        });
    }

    Ok(-(present_value * factor + future_value) / annuity_factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_npv_basic() {
        let cfs = vec![dec!(-1000), dec!(300), dec!(400), dec!(500)];
        let result = npv(dec!(0.10), &cfs).unwrap();
        // -1000 + 300/1.1 + 400/1.21 + 500/1.331 ≈ -21.04
        assert!((result - dec!(-21.04)).abs() < dec!(1.0));
    }

    #[test]
    fn test_npv_zero_rate() {
        let cfs = vec![dec!(-100), dec!(50), dec!(50), dec!(50)];
        assert_eq!(npv(dec!(0.0), &cfs).unwrap(), dec!(50));
    }

    #[test]
    fn test_pmt_standard_loan() {
        let payment = pmt(dec!(0.06), 10, dec!(1000), dec!(0)).unwrap();
        // 1000 * 0.06 / (1 - 1.06^-10) ≈ 135.87, paid out
        assert!((payment + dec!(135.87)).abs() < dec!(0.01), "payment: {payment}");
    }

    #[test]
    fn test_pmt_zero_rate_is_level() {
        assert_eq!(pmt(dec!(0), 4, dec!(120), dec!(0)).unwrap(), dec!(-30));
    }

    #[test]
    fn test_xirr_round_trip_known_rate() {
        // Outflow -100 at t0 followed by a 5-year annuity whose PV at 8%
        // is exactly 100, so the solver must recover 8%.
        let r0 = dec!(0.08);
        let payment = -pmt(r0, 5, dec!(100), dec!(0)).unwrap();
        let mut flows = vec![(d(2025, 1, 1), dec!(-100))];
        for year in 1..=5 {
            flows.push((d(2025 + year, 1, 1), payment));
        }
        let solved = xirr(&flows, &ModelConfig::default()).unwrap();
        assert!(
            (solved - r0).abs() < dec!(0.000001),
            "expected ~{r0}, got {solved}"
        );
    }

    #[test]
    fn test_xirr_irregular_spacing() {
        let flows = vec![
            (d(2025, 1, 1), dec!(-1000)),
            (d(2025, 7, 15), dec!(300)),
            (d(2026, 3, 1), dec!(450)),
            (d(2027, 11, 20), dec!(500)),
        ];
        let rate = xirr(&flows, &ModelConfig::default()).unwrap();
        // The solved rate must zero the NPV
        let check = xnpv(rate, &flows).unwrap();
        assert!(check.abs() < dec!(0.0001), "NPV at solved rate: {check}");
    }

    #[test]
    fn test_xirr_all_positive_is_no_root() {
        let flows = vec![
            (d(2025, 1, 1), dec!(100)),
            (d(2026, 1, 1), dec!(100)),
            (d(2027, 1, 1), dec!(100)),
        ];
        match xirr(&flows, &ModelConfig::default()) {
            Err(ModelError::NoRoot { .. }) => {}
            other => panic!("Expected NoRoot, got: {other:?}"),
        }
    }

    #[test]
    fn test_xirr_single_flow_insufficient() {
        let flows = vec![(d(2025, 1, 1), dec!(-100))];
        assert!(matches!(
            xirr(&flows, &ModelConfig::default()),
            Err(ModelError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_xirr_unsorted_input() {
        let sorted = vec![
            (d(2025, 1, 1), dec!(-1000)),
            (d(2026, 1, 1), dec!(600)),
            (d(2027, 1, 1), dec!(600)),
        ];
        let mut shuffled = sorted.clone();
        shuffled.swap(0, 2);
        let cfg = ModelConfig::default();
        let a = xirr(&sorted, &cfg).unwrap();
        let b = xirr(&shuffled, &cfg).unwrap();
        assert!((a - b).abs() < dec!(0.000001));
    }

    #[test]
    fn test_xnpv_near_domain_edge_errors_instead_of_panicking() {
        // At -99% a 13-year-out flow's discount factor is ~1e-26; the
        // quotient leaves Decimal range and must surface as an error
        let flows = vec![(d(2025, 1, 1), dec!(-1000)), (d(2038, 1, 1), dec!(1000))];
        assert!(matches!(
            xnpv(dec!(-0.99), &flows),
            Err(ModelError::DivisionByZero { .. })
        ));
    }

    #[test]
    fn test_bisection_fallback_recovers_root() {
        // Newton disabled outright: the solver must bracket and bisect.
        // The -0.99 seed rate is unevaluable for these long-dated flows
        // and has to be skipped, not panic.
        let flows = vec![(d(2025, 1, 1), dec!(-1000)), (d(2038, 1, 1), dec!(2000))];
        let config = ModelConfig {
            irr_max_iterations: 0,
            ..ModelConfig::default()
        };
        let rate = xirr(&flows, &config).unwrap();
        // (1+r)^13 = 2 gives r ≈ 5.48%
        assert!((rate - dec!(0.0548)).abs() < dec!(0.001), "rate: {rate}");
        let check = xnpv(rate, &flows).unwrap();
        assert!(check.abs() < dec!(0.001), "NPV at solved rate: {check}");
    }

    #[test]
    fn test_root_outside_domain_is_no_root() {
        // -100 now, +0.5 in a year: the root sits below -99%, outside the
        // bisection domain, and Newton's clamp pins it at the edge
        let flows = vec![(d(2025, 1, 1), dec!(-100)), (d(2026, 1, 1), dec!(0.5))];
        match xirr(&flows, &ModelConfig::default()) {
            Err(ModelError::NoRoot { .. }) => {}
            other => panic!("Expected NoRoot, got: {other:?}"),
        }
    }
}

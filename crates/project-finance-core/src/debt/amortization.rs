//! Amortization schedule construction and reconciliation.
//!
//! Schedules are expanded row by row from an opening principal. Each row
//! carries `opening_balance`, `interest`, `principal`, `closing_balance`,
//! and the chain must reconcile: every closing balance equals the next
//! opening balance, and the final closing balance is zero (or a declared
//! balloon) within tolerance.

use rust_decimal::Decimal;

use crate::error::ModelError;
use crate::types::{AmortizationEntry, Money, Rate};
use crate::ModelResult;

/// Expand a sculpted schedule: each period's total debt service is capped at
/// `service_caps[t]` (CFADS / target DSCR, floored at zero upstream), with
/// interest paid first and the remainder applied to principal.
///
/// When a cap does not even cover the period's interest, principal repayment
/// is zero for that period and the balance carries flat; interest is still
/// paid in full. The schedule stops early if the balance reaches zero before
/// the caps run out.
pub fn sculpted_schedule(
    principal: Money,
    periodic_rate: Rate,
    service_caps: &[Money],
) -> Vec<AmortizationEntry> {
    let mut schedule = Vec::with_capacity(service_caps.len());
    let mut balance = principal;

    for (t, cap) in service_caps.iter().enumerate() {
        if balance <= Decimal::ZERO {
            break;
        }

        let interest = balance * periodic_rate;
        let repayment = (*cap - interest).max(Decimal::ZERO).min(balance);
        let closing = balance - repayment;

        schedule.push(AmortizationEntry {
            period: (t + 1) as u32,
            opening_balance: balance,
            interest,
            principal: repayment,
            closing_balance: closing,
        });

        balance = closing;
    }

    schedule
}

/// Expand a flat-annuity schedule over `tenor_periods`. The final period
/// repays the remaining balance exactly, absorbing accumulated rounding in
/// the annuity payment.
pub fn annuity_schedule(
    principal: Money,
    periodic_rate: Rate,
    tenor_periods: u32,
) -> ModelResult<Vec<AmortizationEntry>> {
    if tenor_periods == 0 {
        return Err(ModelError::InvalidInput {
            field: "tenor_periods".into(),
            reason: "Annuity schedule requires at least one period".into(),
        });
    }

    let payment = -crate::time_value::pmt(periodic_rate, tenor_periods, principal, Decimal::ZERO)?;

    let mut schedule = Vec::with_capacity(tenor_periods as usize);
    let mut balance = principal;

    for t in 1..=tenor_periods {
        let interest = balance * periodic_rate;
        let repayment = if t == tenor_periods {
            balance
        } else {
            (payment - interest).max(Decimal::ZERO).min(balance)
        };
        let closing = balance - repayment;

        schedule.push(AmortizationEntry {
            period: t,
            opening_balance: balance,
            interest,
            principal: repayment,
            closing_balance: closing,
        });

        balance = closing;
    }

    Ok(schedule)
}

/// Closing balance of the last row, or zero for an empty schedule.
pub fn final_balance(schedule: &[AmortizationEntry]) -> Money {
    schedule
        .last()
        .map(|row| row.closing_balance)
        .unwrap_or(Decimal::ZERO)
}

/// Verify the schedule chains correctly and lands on `balloon` (zero for a
/// fully amortizing tranche) within `tolerance`.
pub fn reconcile(
    schedule: &[AmortizationEntry],
    asset: &str,
    balloon: Money,
    tolerance: Decimal,
) -> ModelResult<()> {
    let mut expected_opening: Option<Money> = None;

    for row in schedule {
        if let Some(prev_closing) = expected_opening {
            if (row.opening_balance - prev_closing).abs() > tolerance {
                return Err(ModelError::Reconciliation {
                    asset: asset.to_string(),
                    final_balance: row.opening_balance - prev_closing,
                    tolerance,
                });
            }
        }
        let row_residual = row.opening_balance - row.principal - row.closing_balance;
        if row_residual.abs() > tolerance {
            return Err(ModelError::Reconciliation {
                asset: asset.to_string(),
                final_balance: row_residual,
                tolerance,
            });
        }
        expected_opening = Some(row.closing_balance);
    }

    let residual = final_balance(schedule) - balloon;
    if residual.abs() > tolerance {
        return Err(ModelError::Reconciliation {
            asset: asset.to_string(),
            final_balance: residual,
            tolerance,
        });
    }

    Ok(())
}

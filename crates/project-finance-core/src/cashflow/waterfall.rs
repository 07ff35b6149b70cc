//! Cash-flow waterfall: merges the input series with the debt schedule into
//! per-period `CashFlowLine`s, and re-aggregates lines to coarser
//! granularities without double counting.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::error::ModelError;
use crate::periods::{Granularity, PeriodKey};
use crate::types::{AmortizationEntry, CashFlowLine, Money, PeriodRecord, PeriodSeries};
use crate::ModelResult;

/// Operating costs with the optional tax adjustment folded in, keeping the
/// equity identity to five terms.
pub fn net_opex(record: &PeriodRecord) -> Money {
    record.opex + record.tax.unwrap_or(Decimal::ZERO)
}

/// Cash flow available for debt service: revenue less operating costs and
/// the tax adjustment. Capital expenditure sits below debt service in the
/// waterfall and is excluded here.
pub fn cfads(record: &PeriodRecord) -> Money {
    record.revenue - net_opex(record)
}

/// Re-bucket every record under the series' own granularity, merge records
/// that land in the same bucket, and sort by period. Upstream collaborators
/// sometimes key records by mid-period dates; after this pass identical keys
/// mean identical periods.
pub fn normalize_series(series: &PeriodSeries) -> PeriodSeries {
    let mut buckets: BTreeMap<PeriodKey, PeriodRecord> = BTreeMap::new();

    for record in &series.records {
        let key = record.period.coarsen(series.granularity);
        buckets
            .entry(key)
            .and_modify(|agg| {
                agg.revenue += record.revenue;
                agg.opex += record.opex;
                agg.capex += record.capex;
                agg.depreciation += record.depreciation;
                agg.tax = match (agg.tax, record.tax) {
                    (None, None) => None,
                    (a, b) => Some(a.unwrap_or(Decimal::ZERO) + b.unwrap_or(Decimal::ZERO)),
                };
            })
            .or_insert_with(|| PeriodRecord {
                period: key,
                ..record.clone()
            });
    }

    PeriodSeries {
        asset_id: series.asset_id,
        granularity: series.granularity,
        records: buckets.into_values().collect(),
    }
}

/// Merge a normalized series with the amortization schedule into cash-flow
/// lines.
///
/// Schedule row 1 lands on `records[first_service_index]`; rows past the end
/// of the series are an alignment error. `drawdown` records the debt
/// proceeds as negative principal in the given record index, so the equity
/// column reflects the sponsor's net injection rather than the full CAPEX.
pub fn build_lines(
    series: &PeriodSeries,
    schedule: &[AmortizationEntry],
    first_service_index: usize,
    drawdown: Option<(usize, Money)>,
) -> ModelResult<Vec<CashFlowLine>> {
    let records = &series.records;

    if first_service_index + schedule.len() > records.len() {
        return Err(ModelError::Alignment {
            context: format!("asset {}", series.asset_id),
            reason: format!(
                "Debt schedule of {} periods starting at record {} overruns the {}-record series",
                schedule.len(),
                first_service_index,
                records.len()
            ),
        });
    }
    if let Some((idx, _)) = drawdown {
        if idx >= records.len() {
            return Err(ModelError::Alignment {
                context: format!("asset {}", series.asset_id),
                reason: format!("Drawdown index {idx} outside the {}-record series", records.len()),
            });
        }
    }

    let mut lines = Vec::with_capacity(records.len());

    for (i, record) in records.iter().enumerate() {
        let (interest, mut principal) = if i >= first_service_index {
            match schedule.get(i - first_service_index) {
                Some(row) => (row.interest, row.principal),
                None => (Decimal::ZERO, Decimal::ZERO),
            }
        } else {
            (Decimal::ZERO, Decimal::ZERO)
        };

        if let Some((idx, proceeds)) = drawdown {
            if idx == i {
                principal -= proceeds;
            }
        }

        lines.push(CashFlowLine::balanced(
            series.asset_id,
            record.period,
            record.revenue,
            net_opex(record),
            record.capex,
            record.depreciation,
            interest,
            principal,
        ));
    }

    Ok(lines)
}

/// Re-aggregate lines to a strictly coarser granularity by summing every
/// component within the target bucket. Requesting a finer or incompatible
/// granularity is an alignment error; the cash identity survives because
/// every column is summed linearly.
pub fn aggregate(
    lines: &[CashFlowLine],
    from: Granularity,
    to: Granularity,
) -> ModelResult<Vec<CashFlowLine>> {
    if from == to {
        let mut out = lines.to_vec();
        out.sort_by_key(|l| (l.asset_id, l.period));
        return Ok(out);
    }

    if to.periods_per_year() >= from.periods_per_year() {
        return Err(ModelError::Alignment {
            context: "re-aggregation".into(),
            reason: format!("Target granularity {to:?} is not coarser than source {from:?}"),
        });
    }
    if let (Granularity::Quarterly, Granularity::Fiscal { start_month }) = (from, to) {
        // Same out-of-range clamp as PeriodKey::bucket
        let start_month = start_month.clamp(1, 12);
        if (start_month - 1) % 3 != 0 {
            return Err(ModelError::Alignment {
                context: "re-aggregation".into(),
                reason: format!(
                    "Quarterly buckets do not nest inside a fiscal year starting in month {start_month}"
                ),
            });
        }
    }

    let mut buckets: BTreeMap<(u32, PeriodKey), CashFlowLine> = BTreeMap::new();

    for line in lines {
        let key = line.period.coarsen(to);
        buckets
            .entry((line.asset_id, key))
            .and_modify(|agg| {
                agg.revenue += line.revenue;
                agg.opex += line.opex;
                agg.capex += line.capex;
                agg.depreciation += line.depreciation;
                agg.interest += line.interest;
                agg.principal += line.principal;
                agg.equity_cash_flow += line.equity_cash_flow;
            })
            .or_insert_with(|| CashFlowLine {
                period: key,
                ..line.clone()
            });
    }

    Ok(buckets.into_values().collect())
}

//! End-to-end model runs.
//!
//! `run_asset` takes one asset and its settled period series through debt
//! sizing, the waterfall, and the equity-IRR solve. `run_portfolio` runs
//! every asset, combines hybrid groups, and wraps the whole result in the
//! computation envelope. Runs are pure functions of their inputs; the
//! returned `PortfolioRun` answers coarser-granularity queries from its
//! cached lines without re-running the model.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cashflow::hybrid::{combine_hybrids, HybridCashFlow};
use crate::cashflow::waterfall::{aggregate, build_lines, cfads, normalize_series};
use crate::debt::sizing::{size_debt, SizingOutcome};
use crate::error::ModelError;
use crate::periods::{Granularity, PeriodKey};
use crate::time_value::xirr;
use crate::types::{
    with_metadata, AssetId, AssetRecord, CashFlowLine, ComputationOutput, ModelConfig, Money,
    PeriodSeries, Rate,
};
use crate::ModelResult;

/// One asset taken through sizing, the waterfall, and the IRR solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRun {
    pub asset_id: AssetId,
    pub name: String,
    pub granularity: Granularity,
    pub sizing: SizingOutcome,
    pub lines: Vec<CashFlowLine>,
    /// None when the equity flows admit no IRR; the reason lands in
    /// `warnings`
    pub equity_irr: Option<Rate>,
    pub warnings: Vec<String>,
}

/// A hybrid group's combined flows and the IRR of the summed series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridRun {
    pub cash_flow: HybridCashFlow,
    pub equity_irr: Option<Rate>,
}

/// Portfolio-level headline figures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub total_debt: Money,
    pub min_dscr: Option<Decimal>,
    pub equity_irr: Option<Rate>,
}

/// Full output of a portfolio run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioRun {
    pub assets: Vec<AssetRun>,
    pub hybrids: Vec<HybridRun>,
    pub summary: PortfolioSummary,
}

impl PortfolioRun {
    /// One asset's lines re-aggregated to `target`, from the cached run.
    pub fn asset_lines_at(
        &self,
        asset_id: AssetId,
        target: Granularity,
    ) -> ModelResult<Vec<CashFlowLine>> {
        let run = self
            .assets
            .iter()
            .find(|a| a.asset_id == asset_id)
            .ok_or_else(|| ModelError::InvalidInput {
                field: "asset_id".into(),
                reason: format!("No asset {asset_id} in this run"),
            })?;
        aggregate(&run.lines, run.granularity, target)
    }

    /// A hybrid group's combined lines re-aggregated to `target`.
    pub fn hybrid_lines_at(
        &self,
        group: &str,
        target: Granularity,
    ) -> ModelResult<Vec<CashFlowLine>> {
        let run = self
            .hybrids
            .iter()
            .find(|h| h.cash_flow.group == group)
            .ok_or_else(|| ModelError::InvalidInput {
                field: "group".into(),
                reason: format!("No hybrid group '{group}' in this run"),
            })?;
        aggregate(&run.cash_flow.lines, run.cash_flow.granularity, target)
    }
}

/// Run one asset end to end.
///
/// Records before `operating_start` are construction periods; debt service
/// begins at the first record at or after it, and the debt proceeds are
/// drawn in the first CAPEX-bearing period.
pub fn run_asset(
    asset: &AssetRecord,
    series: &PeriodSeries,
    config: &ModelConfig,
) -> ModelResult<AssetRun> {
    if series.asset_id != asset.id {
        return Err(ModelError::InvalidInput {
            field: "series".into(),
            reason: format!(
                "Series keyed to asset {} supplied for asset {}",
                series.asset_id, asset.id
            ),
        });
    }

    let normalized = normalize_series(series);
    if normalized.records.is_empty() {
        return Err(ModelError::InsufficientData(format!(
            "Empty period series for asset '{}'",
            asset.name
        )));
    }

    let start_key = PeriodKey::bucket(asset.operating_start, normalized.granularity);
    let first_service = normalized
        .records
        .iter()
        .position(|r| r.period >= start_key)
        .ok_or_else(|| {
            ModelError::InsufficientData(format!(
                "No periods at or after the operating start for asset '{}'",
                asset.name
            ))
        })?;

    let cfads_window: Vec<Money> = normalized.records[first_service..]
        .iter()
        .map(cfads)
        .collect();
    let total_capex: Money = normalized.records.iter().map(|r| r.capex).sum();

    let sizing = size_debt(
        &asset.name,
        &asset.financing,
        total_capex,
        &cfads_window,
        normalized.granularity,
        config,
    )?;
    let mut warnings = sizing.warnings.clone();

    let drawdown_index = normalized
        .records
        .iter()
        .position(|r| r.capex > Decimal::ZERO)
        .unwrap_or(first_service);
    let drawdown = Some((drawdown_index, sizing.tranche.principal));

    let lines = build_lines(&normalized, &sizing.schedule, first_service, drawdown)?;

    let equity_irr = solve_equity_irr(&lines, config, &asset.name, &mut warnings)?;

    Ok(AssetRun {
        asset_id: asset.id,
        name: asset.name.clone(),
        granularity: normalized.granularity,
        sizing,
        lines,
        equity_irr,
        warnings,
    })
}

/// Run every asset, combine hybrid groups, and wrap the result in the
/// computation envelope.
pub fn run_portfolio(
    assets: &[AssetRecord],
    series: &[PeriodSeries],
    config: &ModelConfig,
) -> ModelResult<ComputationOutput<PortfolioRun>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    if assets.is_empty() {
        return Err(ModelError::InsufficientData(
            "Portfolio run requires at least one asset".into(),
        ));
    }

    let mut series_by_asset: BTreeMap<AssetId, &PeriodSeries> = BTreeMap::new();
    for s in series {
        if series_by_asset.insert(s.asset_id, s).is_some() {
            return Err(ModelError::InvalidInput {
                field: "series".into(),
                reason: format!("Duplicate period series for asset {}", s.asset_id),
            });
        }
    }

    let mut asset_runs = Vec::with_capacity(assets.len());
    for asset in assets {
        let s = series_by_asset
            .get(&asset.id)
            .ok_or_else(|| ModelError::InsufficientData(format!(
                "No period series supplied for asset '{}' (id {})",
                asset.name, asset.id
            )))?;
        asset_runs.push(run_asset(asset, s, config)?);
    }

    let lines_by_asset: BTreeMap<AssetId, (Granularity, Vec<CashFlowLine>)> = asset_runs
        .iter()
        .map(|r| (r.asset_id, (r.granularity, r.lines.clone())))
        .collect();

    let (hybrid_flows, hybrid_warnings) = combine_hybrids(assets, &lines_by_asset)?;
    warnings.extend(hybrid_warnings);

    let mut hybrids = Vec::with_capacity(hybrid_flows.len());
    for cash_flow in hybrid_flows {
        let label = cash_flow.name.clone();
        let equity_irr = solve_equity_irr(&cash_flow.lines, config, &label, &mut warnings)?;
        hybrids.push(HybridRun {
            cash_flow,
            equity_irr,
        });
    }

    let summary = portfolio_summary(&asset_runs, config, &mut warnings)?;

    let run = PortfolioRun {
        assets: asset_runs,
        hybrids,
        summary,
    };

    let assumptions = json!({
        "asset_count": assets.len(),
        "config": config,
    });

    Ok(with_metadata(
        "DSCR-constrained debt sizing (bisection), cash-flow waterfall with hybrid combination, XIRR equity returns",
        &assumptions,
        warnings,
        start.elapsed().as_micros() as u64,
        run,
    ))
}

/// Equity IRR from the lines' dated equity flows. Solver outcomes that mean
/// "no meaningful IRR" become warnings; anything else propagates.
fn solve_equity_irr(
    lines: &[CashFlowLine],
    config: &ModelConfig,
    label: &str,
    warnings: &mut Vec<String>,
) -> ModelResult<Option<Rate>> {
    let flows: Vec<(NaiveDate, Money)> = lines
        .iter()
        .map(|l| (l.period.date(), l.equity_cash_flow))
        .collect();

    match xirr(&flows, config) {
        Ok(rate) => Ok(Some(rate)),
        Err(
            e @ (ModelError::NoRoot { .. }
            | ModelError::InsufficientData(_)
            | ModelError::ConvergenceFailure { .. }),
        ) => {
            warnings.push(format!("Equity IRR unavailable for {label}: {e}"));
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn portfolio_summary(
    asset_runs: &[AssetRun],
    config: &ModelConfig,
    warnings: &mut Vec<String>,
) -> ModelResult<PortfolioSummary> {
    let total_debt = asset_runs
        .iter()
        .map(|r| r.sizing.tranche.principal)
        .sum();
    let min_dscr = asset_runs.iter().map(|r| r.sizing.tranche.min_dscr).min();

    // Portfolio equity flows summed by calendar date across assets
    let mut by_date: BTreeMap<NaiveDate, Money> = BTreeMap::new();
    for run in asset_runs {
        for line in &run.lines {
            *by_date.entry(line.period.date()).or_insert(Decimal::ZERO) +=
                line.equity_cash_flow;
        }
    }
    let flows: Vec<(NaiveDate, Money)> = by_date.into_iter().collect();

    let equity_irr = match xirr(&flows, config) {
        Ok(rate) => Some(rate),
        Err(
            e @ (ModelError::NoRoot { .. }
            | ModelError::InsufficientData(_)
            | ModelError::ConvergenceFailure { .. }),
        ) => {
            warnings.push(format!("Portfolio equity IRR unavailable: {e}"));
            None
        }
        Err(e) => return Err(e),
    };

    Ok(PortfolioSummary {
        total_debt,
        min_dscr,
        equity_irr,
    })
}

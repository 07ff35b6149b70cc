//! Sensitivity sweep driver.
//!
//! Each scenario is a set of overrides run against its own clone of the
//! base inputs, so scenarios are fully isolated: a failing combination is
//! recorded under its id and the sweep continues. The parallel and
//! sequential drivers produce identically ordered, identical results.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::pipeline::{run_portfolio, PortfolioSummary};
use crate::scenarios::overrides::{apply_overrides, scenario_id, Adjustment, Override, ParameterPath};
use crate::types::{AssetRecord, ModelConfig, PeriodSeries};

/// Outcome of one scenario. A failure carries the rendered error instead of
/// aborting the sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioOutcome {
    Success { summary: PortfolioSummary },
    Failure { error: String },
}

/// One executed scenario. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioRun {
    pub id: String,
    pub overrides: Vec<Override>,
    pub outcome: ScenarioOutcome,
}

impl ScenarioRun {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, ScenarioOutcome::Success { .. })
    }
}

/// One scenario per adjustment of a single parameter.
pub fn single_parameter(path: ParameterPath, adjustments: &[Adjustment]) -> Vec<Vec<Override>> {
    adjustments
        .iter()
        .map(|a| {
            vec![Override {
                path,
                adjustment: *a,
            }]
        })
        .collect()
}

/// Cartesian product across several parameter axes, in axis order.
pub fn cartesian(axes: &[(ParameterPath, Vec<Adjustment>)]) -> Vec<Vec<Override>> {
    let mut scenarios: Vec<Vec<Override>> = vec![Vec::new()];
    for (path, adjustments) in axes {
        let mut next = Vec::with_capacity(scenarios.len() * adjustments.len());
        for base in &scenarios {
            for a in adjustments {
                let mut combined = base.clone();
                combined.push(Override {
                    path: *path,
                    adjustment: *a,
                });
                next.push(combined);
            }
        }
        scenarios = next;
    }
    scenarios
}

/// Run every scenario in parallel. Results come back in scenario order.
pub fn run_sweep(
    assets: &[AssetRecord],
    series: &[PeriodSeries],
    config: &ModelConfig,
    scenarios: &[Vec<Override>],
) -> Vec<ScenarioRun> {
    scenarios
        .par_iter()
        .map(|overrides| run_one(assets, series, config, overrides))
        .collect()
}

/// Sequential variant; byte-identical output to `run_sweep`.
pub fn run_sweep_sequential(
    assets: &[AssetRecord],
    series: &[PeriodSeries],
    config: &ModelConfig,
    scenarios: &[Vec<Override>],
) -> Vec<ScenarioRun> {
    scenarios
        .iter()
        .map(|overrides| run_one(assets, series, config, overrides))
        .collect()
}

fn run_one(
    assets: &[AssetRecord],
    series: &[PeriodSeries],
    config: &ModelConfig,
    overrides: &[Override],
) -> ScenarioRun {
    let id = scenario_id(overrides);
    let mut scenario_assets = assets.to_vec();
    let mut scenario_series = series.to_vec();

    let outcome = match apply_overrides(overrides, &mut scenario_assets, &mut scenario_series)
        .and_then(|_| run_portfolio(&scenario_assets, &scenario_series, config))
    {
        Ok(output) => ScenarioOutcome::Success {
            summary: output.result.summary,
        },
        Err(e) => ScenarioOutcome::Failure {
            error: e.to_string(),
        },
    };

    ScenarioRun {
        id,
        overrides: overrides.to_vec(),
        outcome,
    }
}

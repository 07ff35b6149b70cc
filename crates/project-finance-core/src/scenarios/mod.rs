//! Sensitivity analysis: parameter overrides and sweep execution.

pub mod overrides;
pub mod sweep;

pub use overrides::{apply_overrides, scenario_id, Adjustment, Override, ParameterPath};
pub use sweep::{
    cartesian, run_sweep, run_sweep_sequential, single_parameter, ScenarioOutcome, ScenarioRun,
};

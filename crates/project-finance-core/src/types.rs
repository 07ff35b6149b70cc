use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::periods::{Granularity, PeriodKey};

/// All monetary values. Wraps Decimal to prevent accidental f64 usage.
pub type Money = Decimal;

/// Rates expressed as decimals (0.05 = 5%). Never as percentages.
pub type Rate = Decimal;

/// Asset identifier, stable for a run.
pub type AssetId = u32;

/// How the senior tranche is sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizingMode {
    /// Principal sized so the minimum period DSCR over the tenor equals the
    /// target (period-by-period sculpted debt service).
    Sculpted,
    /// Principal set by the gearing cap with a flat annuity payment; DSCR is
    /// checked post-hoc rather than enforced.
    Annuity,
}

/// Financing parameters for one asset's senior tranche.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancingTerms {
    /// Annual cost of debt
    pub interest_rate: Rate,
    /// Repayment term in years
    pub tenor_years: u32,
    /// Target DSCR enforced by sculpted sizing (e.g. 1.30)
    pub target_dscr: Decimal,
    /// Optional covenant floor distinct from the sizing target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dscr_floor: Option<Decimal>,
    /// Maximum debt / CAPEX
    pub max_gearing: Decimal,
    pub sizing_mode: SizingMode,
}

/// One asset as supplied by the upstream collaborator. Immutable for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: AssetId,
    pub name: String,
    /// e.g. "solar", "wind", "storage"
    pub asset_type: String,
    pub capacity_mw: Decimal,
    /// Assets sharing a tag are combined into one composite entity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hybrid_group: Option<String>,
    pub operating_start: NaiveDate,
    pub lifetime_years: u32,
    pub financing: FinancingTerms,
}

/// Settled numeric record for one asset and period, already reflecting any
/// scenario overrides. Produced upstream; never computed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodRecord {
    pub period: PeriodKey,
    pub revenue: Money,
    pub opex: Money,
    pub capex: Money,
    pub depreciation: Money,
    /// Pluggable tax adjustment; folded into opex before aggregation so the
    /// equity identity stays exact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax: Option<Money>,
}

/// Ordered per-period series for one asset at a declared granularity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodSeries {
    pub asset_id: AssetId,
    pub granularity: Granularity,
    pub records: Vec<PeriodRecord>,
}

/// One row of the final cash-flow table.
///
/// Invariant: `equity_cash_flow = revenue - opex - capex - interest - principal`
/// exactly, with no unexplained residual.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashFlowLine {
    pub asset_id: AssetId,
    pub period: PeriodKey,
    pub revenue: Money,
    pub opex: Money,
    pub capex: Money,
    pub depreciation: Money,
    pub interest: Money,
    pub principal: Money,
    pub equity_cash_flow: Money,
}

impl CashFlowLine {
    /// Build a line with the equity residual derived from the identity.
    #[allow(clippy::too_many_arguments)]
    pub fn balanced(
        asset_id: AssetId,
        period: PeriodKey,
        revenue: Money,
        opex: Money,
        capex: Money,
        depreciation: Money,
        interest: Money,
        principal: Money,
    ) -> Self {
        CashFlowLine {
            asset_id,
            period,
            revenue,
            opex,
            capex,
            depreciation,
            interest,
            principal,
            equity_cash_flow: revenue - opex - capex - interest - principal,
        }
    }

    /// Residual of the cash identity; zero for a well-formed line.
    pub fn identity_residual(&self) -> Money {
        self.revenue - self.opex - self.capex - self.interest - self.principal
            - self.equity_cash_flow
    }
}

/// Which constraint determined the sized principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingConstraint {
    /// The DSCR target capped the principal
    Coverage,
    /// The gearing cap capped the principal
    Leverage,
}

/// The sized senior tranche. Created once per asset; immutable after sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebtTranche {
    pub principal: Money,
    pub tenor_periods: u32,
    pub periodic_rate: Rate,
    pub target_dscr: Decimal,
    pub max_gearing: Decimal,
    /// Minimum realized DSCR across tenor periods with debt service
    pub min_dscr: Decimal,
}

/// One amortization row. Periods are indexed from the start of debt service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmortizationEntry {
    pub period: u32,
    pub opening_balance: Money,
    pub interest: Money,
    pub principal: Money,
    pub closing_balance: Money,
}

impl AmortizationEntry {
    pub fn debt_service(&self) -> Money {
        self.interest + self.principal
    }
}

/// Tolerances and solver bounds passed explicitly into every pipeline
/// invocation. No process-wide state survives between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Bracket width at which the principal bisection stops
    pub sizing_tolerance: Decimal,
    pub sizing_max_iterations: u32,
    /// Permitted residual on the end-of-tenor closing balance
    pub amortization_tolerance: Decimal,
    pub irr_guess: Rate,
    pub irr_max_iterations: u32,
    pub irr_tolerance: Decimal,
    /// Bisection fallback domain for the IRR solver
    pub irr_domain_low: Rate,
    pub irr_domain_high: Rate,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            sizing_tolerance: dec!(0.000001),
            sizing_max_iterations: 100,
            amortization_tolerance: dec!(0.000001),
            irr_guess: dec!(0.1),
            irr_max_iterations: 100,
            irr_tolerance: dec!(0.0000001),
            irr_domain_low: dec!(-0.99),
            irr_domain_high: dec!(10.0),
        }
    }
}

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "rust_decimal_128bit".to_string(),
        },
    }
}

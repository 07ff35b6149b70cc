//! Senior debt: sizing the tranche and expanding its amortization schedule.

pub mod amortization;
pub mod sizing;

pub use amortization::{annuity_schedule, final_balance, reconcile, sculpted_schedule};
pub use sizing::{blended_dscr, size_debt, SizingOutcome};

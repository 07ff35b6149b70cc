//! Cash-flow waterfall assembly and hybrid-group combination.

pub mod hybrid;
pub mod waterfall;

pub use hybrid::{combine_hybrids, HybridCashFlow};
pub use waterfall::{aggregate, build_lines, cfads, net_opex, normalize_series};

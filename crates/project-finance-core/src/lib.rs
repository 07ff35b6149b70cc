pub mod cashflow;
pub mod debt;
pub mod error;
pub mod periods;
pub mod pipeline;
pub mod time_value;
pub mod types;

#[cfg(feature = "scenarios")]
pub mod scenarios;

pub use error::ModelError;
pub use periods::{Granularity, PeriodKey};
pub use types::*;

/// Standard result type for all model operations
pub type ModelResult<T> = Result<T, ModelError>;

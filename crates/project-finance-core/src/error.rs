use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid input: {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Debt sizing failed for {asset}: {reason}")]
    Sizing { asset: String, reason: String },

    #[error("Convergence failure: {function} did not converge after {iterations} iterations (delta: {last_delta})")]
    ConvergenceFailure {
        function: String,
        iterations: u32,
        last_delta: Decimal,
    },

    #[error("Amortization reconciliation failed for {asset}: closing balance {final_balance} at tenor end exceeds tolerance {tolerance}")]
    Reconciliation {
        asset: String,
        final_balance: Decimal,
        tolerance: Decimal,
    },

    #[error("No root: {function} found no NPV sign change over [{low}, {high}]")]
    NoRoot {
        function: String,
        low: Decimal,
        high: Decimal,
    },

    #[error("Period alignment failed for {context}: {reason}")]
    Alignment { context: String, reason: String },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Division by zero in {context}")]
    DivisionByZero { context: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for ModelError {
    fn from(e: serde_json::Error) -> Self {
        ModelError::SerializationError(e.to_string())
    }
}

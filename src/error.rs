/// Error types for the allocation crate
///
/// - **AllocationError**: every failure a unit of work can end in
/// - **Result**: Type alias for `Result<T, AllocationError>`

use crate::solver::{ConstraintFamily, SolveStatus};
use thiserror::Error;

/// Result type alias for allocation operations
pub type Result<T> = std::result::Result<T, AllocationError>;

/// Main error type
#[derive(Error, Debug)]
pub enum AllocationError {
    /// Inconsistent or incomplete input data
    #[error("data error: {0}")]
    Data(String),

    /// A product must be produced but no producer can make it
    #[error("product '{product}' has lower bound {lower_bound} but no producer has a cost entry for it")]
    UncoveredProduct { product: String, lower_bound: f64 },

    /// The configuration asks for a budget constraint the data does not carry
    #[error("budget constraint requested but no total-cost budget is present in the data")]
    MissingBudget,

    /// Demand distribution parameters were rejected
    #[error("invalid demand parameters for '{product}': {reason}")]
    InvalidDemand { product: String, reason: String },

    /// The solver proved the model infeasible
    #[error("model is infeasible (suspected constraint family: {})", .suspect.map(|f| f.label()).unwrap_or("unknown"))]
    Infeasible { suspect: Option<ConstraintFamily> },

    /// The solver reported an unbounded objective
    #[error("model is unbounded (a variable or aggregate is missing an upper bound)")]
    Unbounded,

    /// The solve ended without an accepted solution (time limit, abnormal stop)
    #[error("solve did not produce an accepted solution: {status:?}")]
    NotOptimal { status: SolveStatus },

    /// Solver backend failure not covered by the statuses above
    #[error("solver error: {0}")]
    Solver(String),

    /// Invalid run configuration
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl AllocationError {
    /// Create a data error
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for outcomes that mean "no feasible plan exists", whether found
    /// by validation before the solve or by the solver itself.
    pub fn is_infeasible(&self) -> bool {
        matches!(
            self,
            Self::Infeasible { .. } | Self::UncoveredProduct { .. }
        )
    }

    /// Constraint family an operator should look at first
    pub fn suspect(&self) -> Option<ConstraintFamily> {
        match self {
            Self::Infeasible { suspect } => *suspect,
            Self::UncoveredProduct { .. } => Some(ConstraintFamily::ProductLower),
            Self::MissingBudget => Some(ConstraintFamily::Budget),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infeasible_message_names_family() {
        let err = AllocationError::Infeasible {
            suspect: Some(ConstraintFamily::Budget),
        };
        assert!(err.to_string().contains("budget"));
        assert!(err.is_infeasible());
        assert_eq!(err.suspect(), Some(ConstraintFamily::Budget));
    }

    #[test]
    fn test_uncovered_product_points_at_product_bounds() {
        let err = AllocationError::UncoveredProduct {
            product: "C".to_string(),
            lower_bound: 10.0,
        };
        assert!(err.is_infeasible());
        assert_eq!(err.suspect(), Some(ConstraintFamily::ProductLower));
        assert!(!AllocationError::Unbounded.is_infeasible());
    }
}

use thiserror::Error;

/// Failure of a single cap table or waterfall computation.
///
/// Every variant is fatal to the computation it occurs in; no partial
/// results are returned alongside an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapTableError {
    /// Malformed or inconsistent input (negative amounts, out-of-order
    /// rounds, oversubscribed pro-rata, ambiguous seniority).
    #[error("Invalid input: {0}")]
    InputValidation(String),
    /// A bounded iterative search did not settle within its limit.
    #[error("Failed to converge: {0}")]
    Convergence(String),
    /// Distributed proceeds do not reconcile with the exit value, or a
    /// distribution is negative.
    #[error("Conservation violated: {0}")]
    ConservationViolation(String),
    /// A conversion or cap decision reverted as exit value increased.
    #[error("Monotonicity violated: {0}")]
    MonotonicityViolation(String),
}

impl CapTableError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        CapTableError::InputValidation(msg.into())
    }

    /// True for errors caused by caller input rather than an engine defect.
    pub fn is_input_error(&self) -> bool {
        matches!(self, CapTableError::InputValidation(_))
    }
}

pub type CapTableResult<T> = Result<T, CapTableError>;

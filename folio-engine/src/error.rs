//! Error types for the rebalancing engine.
//!
//! Optimizer degradation is not an error: it is reported as a flag on the
//! plan (see [`crate::optimizer::Degradation`]). Everything here aborts the run.

use thiserror::Error;

/// Result type alias using the engine error type.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Fatal engine failures.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed or missing input (NaN weights, negative values, ragged
    /// return series, empty portfolio)
    #[error("Data error: {0}")]
    Data(String),

    /// Computed weights break an allocation invariant
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// Policy configuration that cannot be resolved
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Create an error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Check if this is a data error.
    pub fn is_data(&self) -> bool {
        match self {
            Self::Data(_) => true,
            Self::WithContext { source, .. } => source.is_data(),
            _ => false,
        }
    }

    /// Check if this is a policy violation.
    pub fn is_policy_violation(&self) -> bool {
        match self {
            Self::PolicyViolation(_) => true,
            Self::WithContext { source, .. } => source.is_policy_violation(),
            _ => false,
        }
    }
}

/// Extension trait for adding context to engine results.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

/// Reject NaN and infinite values.
pub(crate) fn ensure_finite(value: f64, what: impl FnOnce() -> String) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(EngineError::Data(format!("{} is not finite ({value})", what())))
    }
}

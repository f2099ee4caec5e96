//! Error types for the object counting engine

use thiserror::Error;

use crate::ec::store::ParamKey;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while counting objects
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Caller input was malformed
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Error Correction Errors
    // =========================================================================
    /// Invalid codec configuration
    #[error("Invalid EC configuration: {0}")]
    InvalidEcConfig(String),

    /// Encoding a protected value failed
    #[error("EC encoding failed: {0}")]
    EcEncodingFailed(String),

    /// Too few intact shards to rebuild a value
    #[error("Insufficient shards for reconstruction: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },

    /// Decoding produced bytes that do not form a valid value
    #[error("Corrupted value for {key}: {reason}")]
    Corruption { key: ParamKey, reason: String },

    /// Decoding failed and no last-known-good value exists
    #[error("Parameter {key} is degraded beyond repair")]
    Degraded { key: ParamKey },

    // =========================================================================
    // Execution Errors
    // =========================================================================
    /// One or more component expansions failed mid-traversal
    #[error("Traversal failed in {failed_expansions} component expansion(s)")]
    Traversal { failed_expansions: usize },

    /// A coordinate fell outside the protected grid
    #[error("Coordinate ({row}, {col}) is outside the protected grid")]
    OutOfBounds { row: usize, col: usize },

    /// The replica was cancelled by its watchdog
    #[error("Computation cancelled")]
    Cancelled,

    /// The replica did not finish before its deadline
    #[error("Replica {replica} timed out after {elapsed_ms}ms")]
    Timeout { replica: usize, elapsed_ms: u64 },
}

impl Error {
    /// Whether re-running the computation from a fresh encoding may succeed.
    ///
    /// Malformed input never becomes valid on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Degraded { .. }
                | Error::Corruption { .. }
                | Error::InsufficientShards { .. }
                | Error::Traversal { .. }
                | Error::OutOfBounds { .. }
        )
    }

    /// Whether a failure inside one component expansion stays local to it.
    pub fn is_isolatable(&self) -> bool {
        !matches!(self, Error::Cancelled | Error::Validation(_) | Error::Config(_))
    }
}

/// Shape, type and range violations found by the grid validator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Grid is not a sequence of sequences
    #[error("grid is not a sequence of rows: {found}")]
    NotAMatrix { row: Option<usize>, found: String },

    /// Grid holds no cells
    #[error("grid is empty")]
    EmptyGrid,

    /// A cell is not a finite non-negative number
    #[error("cell ({row}, {col}) is invalid: {reason}")]
    InvalidCell {
        row: usize,
        col: usize,
        reason: String,
    },

    /// Declared dimension is negative
    #[error("declared {dimension} must be non-negative, got {value}")]
    NegativeDimension { dimension: &'static str, value: i64 },

    /// Row count differs from declared height
    #[error("expected {expected} rows, found {actual}")]
    HeightMismatch { expected: usize, actual: usize },

    /// A row length differs from declared width
    #[error("row {row} has {actual} cells, expected {expected}")]
    WidthMismatch {
        row: usize,
        expected: usize,
        actual: usize,
    },

    /// Threshold is not a finite non-negative number
    #[error("threshold is invalid: {0}")]
    InvalidThreshold(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_not_retryable() {
        let err = Error::from(ValidationError::EmptyGrid);
        assert!(!err.is_retryable());
        assert!(!err.is_isolatable());
    }

    #[test]
    fn test_degraded_is_retryable() {
        let err = Error::Degraded {
            key: ParamKey::Threshold,
        };
        assert!(err.is_retryable());
        assert!(err.is_isolatable());
        assert_eq!(err.to_string(), "Parameter threshold is degraded beyond repair");
    }

    #[test]
    fn test_cancelled_is_not_isolatable() {
        assert!(!Error::Cancelled.is_isolatable());
        assert!(!Error::Cancelled.is_retryable());
    }
}

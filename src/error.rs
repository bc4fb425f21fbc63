// =============================================================================
// Error taxonomy — component-boundary errors and the not-enough-data outcome
// =============================================================================
//
// "Not enough candles" is an expected state, not an error: indicator
// functions return Option and analyzers return AnalysisOutcome::Insufficient.
// EngineError covers the genuine failures that cross component boundaries.
// =============================================================================

use thiserror::Error;

/// Failures that cross component boundaries.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A tick with non-positive or missing required prices, or one that
    /// arrived out of timestamp order. Dropped by the feed validator.
    #[error("invalid tick: {0}")]
    InvalidTick(String),

    /// Division by zero or a decimal conversion failure inside ratio
    /// computations. Callers substitute neutral defaults and flag the
    /// result as degraded.
    #[error("arithmetic failure: {0}")]
    Arithmetic(String),

    /// A transient storage write/read failure. Retried with backoff before
    /// surfacing.
    #[error("persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// Impossible configuration detected at startup. Fatal — the engine
    /// refuses to start.
    #[error("configuration error: {0}")]
    Config(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Outcome of one analyzer invocation for one analysis tick.
///
/// `Insufficient` means the input window was smaller than the analyzer's
/// minimum; the orchestrator skips the write and no state changes.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome<T> {
    Ready(T),
    Insufficient,
}

impl<T> AnalysisOutcome<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Insufficient => None,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, Self::Insufficient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_ready_unwraps() {
        let outcome = AnalysisOutcome::Ready(42);
        assert_eq!(outcome.ready(), Some(42));
    }

    #[test]
    fn outcome_insufficient_is_none() {
        let outcome: AnalysisOutcome<i32> = AnalysisOutcome::Insufficient;
        assert!(outcome.is_insufficient());
        assert_eq!(outcome.ready(), None);
    }

    #[test]
    fn config_error_formats() {
        let err = EngineError::Config("trading hours inverted".into());
        assert!(err.to_string().contains("configuration error"));
    }
}

// THEORY:
// Every fallible stage of the engine reports through a single `TrackingError`.
// Hard failures (bad shapes, bad parameters, a decomposition that cannot be
// carried out) abort the run. Soft numerical trouble inside the distance engine
// is not an error: it is recovered locally and recorded as a `NumericalWarning`
// so the caller can judge how far to trust the result.

use std::path::PathBuf;
use thiserror::Error;

/// Convenient `Result` alias used across the crate.
pub type TrackingResult<T> = Result<T, TrackingError>;

/// Fatal errors raised by the tracking and clustering pipeline.
#[derive(Debug, Error)]
pub enum TrackingError {
    /// Two arrays that must share a spatial shape do not.
    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A parameter is outside its valid range. Raised before any computation.
    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// A matrix decomposition or solve could not be completed.
    #[error("Linear algebra failure in {0}")]
    Linalg(String),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing a `.npy` artifact failed.
    #[error("Failed to write array to {path:?}: {source}")]
    Npy {
        path: PathBuf,
        #[source]
        source: ndarray_npy::WriteNpyError,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// A background task panicked or was aborted.
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl TrackingError {
    pub fn invalid_parameter<S: Into<String>>(name: &'static str, reason: S) -> Self {
        TrackingError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    pub fn shape_mismatch(context: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        TrackingError::ShapeMismatch {
            context,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

/// Recoverable numerical conditions detected while building the distance and
/// affinity matrices.
#[derive(Debug, Clone, PartialEq)]
pub enum NumericalWarning {
    /// Entries of a matrix were NaN or infinite and have been replaced.
    NonFiniteEntries {
        matrix: &'static str,
        count: usize,
    },
    /// Non-positive normalized eigenvalues were dropped from a Martin distance.
    DroppedEigenvalues { pair: (usize, usize), dropped: usize },
}

impl std::fmt::Display for NumericalWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NumericalWarning::NonFiniteEntries { matrix, count } => {
                write!(f, "{count} non-finite entries replaced in {matrix} matrix")
            }
            NumericalWarning::DroppedEigenvalues { pair, dropped } => write!(
                f,
                "{dropped} non-positive eigenvalues dropped in Martin distance for pair {pair:?}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_parameter_message_names_the_parameter() {
        let err = TrackingError::invalid_parameter("ar_order", "must be > 0");
        assert_eq!(err.to_string(), "Invalid parameter `ar_order`: must be > 0");
    }

    #[test]
    fn warnings_render_readably() {
        let w = NumericalWarning::DroppedEigenvalues { pair: (1, 2), dropped: 3 };
        assert!(w.to_string().contains("pair (1, 2)"));
    }
}

//! Error types for feature evaluation.
//!
//! Every error is fatal to the evaluation run. The checkpoint mechanism is
//! the only recovery path, so nothing here is retried.

use thiserror::Error;

use crate::eval::snapshot::SnapshotError;

/// Errors produced by the evaluation core.
#[derive(Debug, Error)]
pub enum EvalError {
    /// Invalid options, unsupported mode combinations or bad data geometry.
    #[error("configuration error: {0}")]
    Config(String),

    /// An internal invariant was violated. Indicates a bug, not bad input.
    #[error("internal error: {0}")]
    Internal(String),

    /// The dataset or memory budget cannot support the requested work.
    #[error("resource error: {0}")]
    Resource(String),

    /// Snapshot could not be written or read back.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// I/O error outside of snapshot handling.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for EvalError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

/// Validation errors raised by option and parameter builders.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("learning_rate must be positive, got {0}")]
    InvalidLearningRate(f32),
    #[error("{field} must be at least 1")]
    NotPositive { field: &'static str },
    #[error("{field} must be in (0, 1], got {value}")]
    InvalidRatio { field: &'static str, value: f64 },
    #[error("{field} must be non-negative, got {value}")]
    InvalidRegularization { field: &'static str, value: f32 },
    #[error("time_split_quantile must be in [0, 1], got {0}")]
    InvalidQuantile(f64),
    #[error("feature set {0} is empty")]
    EmptyFeatureSet(usize),
    #[error("Feature evaluation requires inverted cross-validation")]
    UnsupportedCrossValidation,
    #[error("offset must be 0 in cross-validation mode, got {0}")]
    OffsetWithCrossValidation(u32),
}

/// Result alias used throughout the crate.
pub type Result<T, E = EvalError> = std::result::Result<T, E>;

/// Return a [`EvalError::Config`] unless `cond` holds.
macro_rules! ensure_config {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::EvalError::Config(format!($($arg)+)));
        }
    };
}

/// Return a [`EvalError::Internal`] unless `cond` holds.
macro_rules! ensure_internal {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::EvalError::Internal(format!($($arg)+)));
        }
    };
}

pub(crate) use ensure_config;
pub(crate) use ensure_internal;

//! Evaluation metrics for fold scoring.
//!
//! Metrics receive raw model output ("approx") of shape `[n_outputs, n_objects]`
//! and the fold's targets. Classification metrics map approx through the
//! sigmoid themselves, so the scorer never transforms predictions.
//!
//! Only the direction contract matters to the evaluator: every metric must
//! declare whether it is minimized or maximized through [`BestValue`]. A metric
//! with a fixed or undefined best value cannot pick a best iteration and is
//! rejected before any training starts.
//!
//! # Available Metrics
//!
//! ## Regression
//! - [`Rmse`]: Root Mean Squared Error
//! - [`Mae`]: Mean Absolute Error
//! - [`R2`]: Coefficient of determination
//!
//! ## Classification
//! - [`LogLoss`]: Binary cross-entropy
//! - [`Accuracy`]: Binary accuracy at a probability threshold
//! - [`Auc`]: Area Under ROC Curve

mod classification;
mod regression;

use std::sync::Arc;

use ndarray::{ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

pub use classification::{Accuracy, Auc, LogLoss};
pub use regression::{Mae, Rmse, R2};

use crate::error::{EvalError, Result};

// =============================================================================
// Best value contract
// =============================================================================

/// What a metric considers its best value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BestValue {
    /// Lower is better.
    Min,
    /// Higher is better.
    Max,
    /// A specific target value is best.
    Fixed(f64),
    /// No notion of best.
    Undefined,
}

impl BestValue {
    /// Optimization direction, if the metric has one.
    pub fn direction(self) -> Option<Direction> {
        match self {
            Self::Min => Some(Direction::Minimize),
            Self::Max => Some(Direction::Maximize),
            Self::Fixed(_) | Self::Undefined => None,
        }
    }
}

/// Optimization direction of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Minimize,
    Maximize,
}

impl Direction {
    /// Whether `candidate` is strictly better than `best`.
    #[inline]
    pub fn is_better(self, candidate: f64, best: f64) -> bool {
        match self {
            Self::Minimize => candidate < best,
            Self::Maximize => candidate > best,
        }
    }
}

// =============================================================================
// Metric Trait
// =============================================================================

/// A metric for evaluating model quality on one fold.
pub trait MetricFn: Send + Sync {
    /// Compute the metric from raw approx `[n_outputs, n_objects]`.
    fn compute(&self, approx: ArrayView2<'_, f32>, targets: ArrayView1<'_, f32>) -> f64;

    fn best_value(&self) -> BestValue;

    /// Name of the metric (for logs and report headers).
    fn name(&self) -> &str;
}

// =============================================================================
// Custom Metric
// =============================================================================

/// Type alias for the custom metric compute function.
pub type CustomMetricFn =
    Box<dyn Fn(ArrayView2<'_, f32>, ArrayView1<'_, f32>) -> f64 + Send + Sync + 'static>;

/// A user-provided metric defined by a closure.
pub struct CustomMetric {
    name: String,
    compute_fn: CustomMetricFn,
    best_value: BestValue,
}

impl CustomMetric {
    pub fn new(
        name: impl Into<String>,
        compute_fn: impl Fn(ArrayView2<'_, f32>, ArrayView1<'_, f32>) -> f64 + Send + Sync + 'static,
        best_value: BestValue,
    ) -> Self {
        Self {
            name: name.into(),
            compute_fn: Box::new(compute_fn),
            best_value,
        }
    }
}

impl MetricFn for CustomMetric {
    fn compute(&self, approx: ArrayView2<'_, f32>, targets: ArrayView1<'_, f32>) -> f64 {
        (self.compute_fn)(approx, targets)
    }

    fn best_value(&self) -> BestValue {
        self.best_value
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for CustomMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomMetric")
            .field("name", &self.name)
            .field("best_value", &self.best_value)
            .finish()
    }
}

// =============================================================================
// Metric Enum
// =============================================================================

/// A dynamically-dispatched metric.
#[derive(Clone, Debug)]
pub enum Metric {
    Rmse(Rmse),
    Mae(Mae),
    R2(R2),
    LogLoss(LogLoss),
    Accuracy(Accuracy),
    Auc(Auc),
    Custom(Arc<CustomMetric>),
}

impl Default for Metric {
    fn default() -> Self {
        Self::Rmse(Rmse)
    }
}

impl Metric {
    pub fn rmse() -> Self {
        Self::Rmse(Rmse)
    }

    pub fn mae() -> Self {
        Self::Mae(Mae)
    }

    pub fn r2() -> Self {
        Self::R2(R2)
    }

    pub fn logloss() -> Self {
        Self::LogLoss(LogLoss)
    }

    /// Accuracy with threshold 0.5.
    pub fn accuracy() -> Self {
        Self::Accuracy(Accuracy::default())
    }

    pub fn accuracy_with_threshold(threshold: f32) -> Self {
        Self::Accuracy(Accuracy::with_threshold(threshold))
    }

    pub fn auc() -> Self {
        Self::Auc(Auc)
    }

    pub fn custom(metric: CustomMetric) -> Self {
        Self::Custom(Arc::new(metric))
    }

    /// Direction of this metric, or a configuration error when it has none.
    pub fn direction(&self) -> Result<Direction> {
        self.best_value().direction().ok_or_else(|| {
            EvalError::Config(format!(
                "Metric {} has no best value direction; feature evaluation needs a metric to minimize or maximize",
                self.name()
            ))
        })
    }
}

impl MetricFn for Metric {
    fn compute(&self, approx: ArrayView2<'_, f32>, targets: ArrayView1<'_, f32>) -> f64 {
        match self {
            Self::Rmse(inner) => inner.compute(approx, targets),
            Self::Mae(inner) => inner.compute(approx, targets),
            Self::R2(inner) => inner.compute(approx, targets),
            Self::LogLoss(inner) => inner.compute(approx, targets),
            Self::Accuracy(inner) => inner.compute(approx, targets),
            Self::Auc(inner) => inner.compute(approx, targets),
            Self::Custom(inner) => inner.compute(approx, targets),
        }
    }

    fn best_value(&self) -> BestValue {
        match self {
            Self::Rmse(inner) => inner.best_value(),
            Self::Mae(inner) => inner.best_value(),
            Self::R2(inner) => inner.best_value(),
            Self::LogLoss(inner) => inner.best_value(),
            Self::Accuracy(inner) => inner.best_value(),
            Self::Auc(inner) => inner.best_value(),
            Self::Custom(inner) => inner.best_value(),
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Rmse(inner) => inner.name(),
            Self::Mae(inner) => inner.name(),
            Self::R2(inner) => inner.name(),
            Self::LogLoss(inner) => inner.name(),
            Self::Accuracy(inner) => inner.name(),
            Self::Auc(inner) => inner.name(),
            Self::Custom(inner) => inner.name(),
        }
    }
}

/// Directions of all metrics; fails on the first metric without one.
pub fn metric_directions(metrics: &[Metric]) -> Result<Vec<Direction>> {
    crate::error::ensure_config!(!metrics.is_empty(), "At least one metric is required");
    metrics.iter().map(Metric::direction).collect()
}

/// Iterate over (approx, target) pairs of the first output.
#[inline]
pub(crate) fn first_output<'a, 'b>(
    approx: ArrayView2<'a, f32>,
    targets: ArrayView1<'b, f32>,
) -> impl Iterator<Item = (f64, f64)> + use<'a, 'b> {
    approx
        .index_axis_move(Axis(0), 0)
        .into_iter()
        .zip(targets)
        .map(|(&a, &t)| (a as f64, t as f64))
}

// =============================================================================
// Tests
// =============================================================================

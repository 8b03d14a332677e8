//! Regression metrics.

use ndarray::{ArrayView1, ArrayView2};

use super::{first_output, BestValue, MetricFn};

// =============================================================================
// RMSE (Root Mean Squared Error)
// =============================================================================

/// Root Mean Squared Error: sqrt(mean((approx - target)²))
#[derive(Debug, Clone, Copy, Default)]
pub struct Rmse;

impl MetricFn for Rmse {
    fn compute(&self, approx: ArrayView2<'_, f32>, targets: ArrayView1<'_, f32>) -> f64 {
        if targets.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = first_output(approx, targets)
            .map(|(a, t)| (a - t) * (a - t))
            .sum();
        (sum_sq / targets.len() as f64).sqrt()
    }

    fn best_value(&self) -> BestValue {
        BestValue::Min
    }

    fn name(&self) -> &str {
        "RMSE"
    }
}

// =============================================================================
// MAE (Mean Absolute Error)
// =============================================================================

/// Mean Absolute Error: mean(|approx - target|)
#[derive(Debug, Clone, Copy, Default)]
pub struct Mae;

impl MetricFn for Mae {
    fn compute(&self, approx: ArrayView2<'_, f32>, targets: ArrayView1<'_, f32>) -> f64 {
        if targets.is_empty() {
            return 0.0;
        }
        let sum_ae: f64 = first_output(approx, targets).map(|(a, t)| (a - t).abs()).sum();
        sum_ae / targets.len() as f64
    }

    fn best_value(&self) -> BestValue {
        BestValue::Min
    }

    fn name(&self) -> &str {
        "MAE"
    }
}

// =============================================================================
// R²
// =============================================================================

/// Coefficient of determination: 1 - SS_res / SS_tot.
///
/// Constant targets give 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct R2;

impl MetricFn for R2 {
    fn compute(&self, approx: ArrayView2<'_, f32>, targets: ArrayView1<'_, f32>) -> f64 {
        if targets.is_empty() {
            return 0.0;
        }
        let mean = targets.iter().map(|&t| t as f64).sum::<f64>() / targets.len() as f64;
        let (ss_res, ss_tot) = first_output(approx, targets).fold((0.0, 0.0), |(res, tot), (a, t)| {
            (res + (t - a) * (t - a), tot + (t - mean) * (t - mean))
        });
        if ss_tot == 0.0 {
            return 0.0;
        }
        1.0 - ss_res / ss_tot
    }

    fn best_value(&self) -> BestValue {
        BestValue::Max
    }

    fn name(&self) -> &str {
        "R2"
    }
}

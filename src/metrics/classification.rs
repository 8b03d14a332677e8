//! Binary classification metrics.
//!
//! Targets are 0/1 labels (anything above 0.5 counts as positive). Approx is
//! the raw margin; probabilities are `sigmoid(approx)`.

use ndarray::{ArrayView1, ArrayView2};

use super::{first_output, BestValue, MetricFn};

const EPS: f64 = 1e-15;

#[inline]
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

// =============================================================================
// LogLoss
// =============================================================================

/// Binary cross-entropy on sigmoid probabilities.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogLoss;

impl MetricFn for LogLoss {
    fn compute(&self, approx: ArrayView2<'_, f32>, targets: ArrayView1<'_, f32>) -> f64 {
        if targets.is_empty() {
            return 0.0;
        }
        let sum: f64 = first_output(approx, targets)
            .map(|(a, t)| {
                let p = sigmoid(a).clamp(EPS, 1.0 - EPS);
                -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
            })
            .sum();
        sum / targets.len() as f64
    }

    fn best_value(&self) -> BestValue {
        BestValue::Min
    }

    fn name(&self) -> &str {
        "Logloss"
    }
}

// =============================================================================
// Accuracy
// =============================================================================

/// Fraction of objects whose thresholded probability matches the label.
#[derive(Debug, Clone, Copy)]
pub struct Accuracy {
    pub threshold: f32,
}

impl Default for Accuracy {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

impl Accuracy {
    pub fn with_threshold(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl MetricFn for Accuracy {
    fn compute(&self, approx: ArrayView2<'_, f32>, targets: ArrayView1<'_, f32>) -> f64 {
        if targets.is_empty() {
            return 0.0;
        }
        let threshold = self.threshold as f64;
        let correct = first_output(approx, targets)
            .filter(|&(a, t)| (sigmoid(a) > threshold) == (t > 0.5))
            .count();
        correct as f64 / targets.len() as f64
    }

    fn best_value(&self) -> BestValue {
        BestValue::Max
    }

    fn name(&self) -> &str {
        "Accuracy"
    }
}

// =============================================================================
// AUC
// =============================================================================

/// Area under the ROC curve via average ranks (Mann-Whitney U).
///
/// Ranking is invariant under the sigmoid, so raw approx is ranked directly.
/// A fold with only one class gives 0.5.
#[derive(Debug, Clone, Copy, Default)]
pub struct Auc;

impl MetricFn for Auc {
    fn compute(&self, approx: ArrayView2<'_, f32>, targets: ArrayView1<'_, f32>) -> f64 {
        let pairs: Vec<(f64, bool)> = first_output(approx, targets)
            .map(|(a, t)| (a, t > 0.5))
            .collect();
        compute_auc(&pairs)
    }

    fn best_value(&self) -> BestValue {
        BestValue::Max
    }

    fn name(&self) -> &str {
        "AUC"
    }
}

fn compute_auc(pairs: &[(f64, bool)]) -> f64 {
    let n = pairs.len();
    let n_pos = pairs.iter().filter(|(_, positive)| *positive).count();
    let n_neg = n - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| pairs[a].0.total_cmp(&pairs[b].0));

    let mut rank_sum_pos = 0.0f64;
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && pairs[order[j]].0 == pairs[order[i]].0 {
            j += 1;
        }
        // Ranks are 1-based; ties share the average rank.
        let avg_rank = (i + 1 + j) as f64 / 2.0;
        rank_sum_pos += order[i..j].iter().filter(|&&idx| pairs[idx].1).count() as f64 * avg_rank;
        i = j;
    }

    let n_pos = n_pos as f64;
    (rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64)
}

//! Accumulated results of a feature evaluation run.
//!
//! All per-fold data is keyed `[is_test][feature_set_idx]` and holds one
//! entry per evaluated fold, in evaluation order. After the last fold,
//! [`FeatureEvaluationSummary::calc_wx_test_and_average_delta`] derives the
//! per-set p-values and average metric deltas reported by the `Display`
//! implementation.

use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::options::FeatureEvalMode;
use crate::error::{ensure_internal, EvalError, Result};
use crate::metrics::{metric_directions, Direction, Metric, MetricFn};
use crate::stats::wx_test;

/// `[iteration][metric]` values of one fold.
pub type MetricsHistory = Vec<Vec<f64>>;

/// `(strength, feature_idx)` pairs of one fold, strongest first.
pub type FeatureStrengths = Vec<(f64, u32)>;

/// File written per fold with the test metric history.
pub const TEST_ERROR_FILE: &str = "test_error.tsv";
/// File written per fold with internal feature strengths.
pub const FSTR_FILE: &str = "fstr.tsv";
/// File written per fold with regular feature strengths.
pub const REGULAR_FSTR_FILE: &str = "regular_fstr.tsv";

/// Results of a feature evaluation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureEvaluationSummary {
    metric_names: Vec<String>,
    metric_directions: Vec<Direction>,
    feature_sets: Vec<Vec<u32>>,

    /// `[is_test][set][fold]`.
    metrics_history: [Vec<Vec<MetricsHistory>>; 2],
    /// `[is_test][set][fold]`.
    feature_strengths: [Vec<Vec<FeatureStrengths>>; 2],
    /// `[is_test][set][fold]`.
    regular_feature_strengths: [Vec<Vec<FeatureStrengths>>; 2],
    /// `[set][fold]`.
    best_baseline_iterations: Vec<Vec<u32>>,
    /// `[is_test][set][metric][fold]`.
    best_metrics: [Vec<Vec<Vec<f64>>>; 2],

    /// `[set]`.
    wx_test: Vec<f64>,
    /// `[set][metric]`.
    average_metric_delta: Vec<Vec<f64>>,
}

/// Index of the best iteration by the first metric; the earliest wins ties.
pub fn best_iteration(direction: Direction, history: &[Vec<f64>]) -> Option<usize> {
    let mut best = 0;
    let first = history.first()?.first()?;
    let mut best_value = *first;
    for (iteration, values) in history.iter().enumerate().skip(1) {
        let value = *values.first()?;
        if direction.is_better(value, best_value) {
            best = iteration;
            best_value = value;
        }
    }
    Some(best)
}

/// Directory name of one fold's training run.
pub fn fold_dir_name(mode: FeatureEvalMode, has_sets: bool, is_test: bool, set_idx: usize, fold_idx: u32) -> String {
    if is_test {
        format!("Testing_set_{set_idx}_fold_{fold_idx}")
    } else if has_sets && mode == FeatureEvalMode::OneVsOthers {
        format!("Baseline_set_{set_idx}_fold_{fold_idx}")
    } else {
        format!("Baseline_fold_{fold_idx}")
    }
}

impl FeatureEvaluationSummary {
    pub fn has_header_info(&self) -> bool {
        !self.metric_names.is_empty()
    }

    /// Fix metric columns and feature sets and size all per-set storage.
    ///
    /// # Errors
    ///
    /// Fails when a metric has no best-value direction.
    pub fn set_header_info(&mut self, metrics: &[Metric], feature_sets: &[Vec<u32>]) -> Result<()> {
        self.metric_directions = metric_directions(metrics)?;
        self.metric_names = metrics.iter().map(|m| m.name().to_string()).collect();
        self.feature_sets = feature_sets.to_vec();

        let set_count = self.feature_set_count();
        for slot in 0..2 {
            self.metrics_history[slot] = vec![Vec::new(); set_count];
            self.feature_strengths[slot] = vec![Vec::new(); set_count];
            self.regular_feature_strengths[slot] = vec![Vec::new(); set_count];
            self.best_metrics[slot] = vec![Vec::new(); set_count];
        }
        self.best_baseline_iterations = vec![Vec::new(); set_count];
        Ok(())
    }

    /// Number of result slots: one per feature set, at least one.
    pub fn feature_set_count(&self) -> usize {
        self.feature_sets.len().max(1)
    }

    pub fn metric_names(&self) -> &[String] {
        &self.metric_names
    }

    pub fn metric_directions(&self) -> &[Direction] {
        &self.metric_directions
    }

    pub fn feature_sets(&self) -> &[Vec<u32>] {
        &self.feature_sets
    }

    /// Whether any testing model has been recorded.
    pub fn has_testing_results(&self) -> bool {
        self.metrics_history[1].iter().any(|folds| !folds.is_empty())
    }

    fn check_slot(&self, set_idx: usize) -> Result<()> {
        ensure_internal!(self.has_header_info(), "Feature evaluation summary has no header");
        ensure_internal!(
            set_idx < self.feature_set_count(),
            "Feature set index {set_idx} is too large"
        );
        Ok(())
    }

    /// Record the test metric history of one fold and its best-iteration
    /// metric values.
    pub fn push_fold(&mut self, is_test: bool, set_idx: usize, history: MetricsHistory) -> Result<()> {
        self.check_slot(set_idx)?;
        let direction = self.metric_directions[0];
        let best = best_iteration(direction, &history)
            .ok_or_else(|| EvalError::Internal("Fold has no metric history".into()))?;
        let metric_count = self.metric_names.len();
        ensure_internal!(
            history[best].len() == metric_count,
            "Fold history has {} metrics, expected {metric_count}",
            history[best].len()
        );

        if !is_test {
            self.best_baseline_iterations[set_idx].push(best as u32);
        }
        let best_metrics = &mut self.best_metrics[usize::from(is_test)][set_idx];
        best_metrics.resize(metric_count, Vec::new());
        for (per_metric, value) in best_metrics.iter_mut().zip(&history[best]) {
            per_metric.push(*value);
        }
        self.metrics_history[usize::from(is_test)][set_idx].push(history);
        Ok(())
    }

    /// Record feature strengths of one fold.
    pub fn push_feature_strengths(
        &mut self,
        is_test: bool,
        set_idx: usize,
        strengths: Option<FeatureStrengths>,
        regular: Option<FeatureStrengths>,
    ) -> Result<()> {
        self.check_slot(set_idx)?;
        let slot = usize::from(is_test);
        if let Some(strengths) = strengths {
            self.feature_strengths[slot][set_idx].push(strengths);
        }
        if let Some(regular) = regular {
            self.regular_feature_strengths[slot][set_idx].push(regular);
        }
        Ok(())
    }

    /// Reuse the shared baseline of set 0 for `set_idx`.
    pub fn share_baseline(&mut self, set_idx: usize) -> Result<()> {
        self.check_slot(set_idx)?;
        self.best_metrics[0][set_idx] = self.best_metrics[0][0].clone();
        self.best_baseline_iterations[set_idx] = self.best_baseline_iterations[0].clone();
        Ok(())
    }

    /// Treat the baseline results of `baseline_idx` as the testing results of
    /// `set_idx`.
    pub fn copy_baseline_into_testing(&mut self, set_idx: usize, baseline_idx: usize) -> Result<()> {
        self.check_slot(set_idx)?;
        self.check_slot(baseline_idx)?;
        self.metrics_history[1][set_idx] = self.metrics_history[0][baseline_idx].clone();
        self.feature_strengths[1][set_idx] = self.feature_strengths[0][baseline_idx].clone();
        self.regular_feature_strengths[1][set_idx] = self.regular_feature_strengths[0][baseline_idx].clone();
        self.best_metrics[1][set_idx] = self.best_metrics[0][baseline_idx].clone();
        Ok(())
    }

    /// Derive per-set Wx p-values and average metric deltas.
    ///
    /// Deltas are signed so that a positive value means the tested model is
    /// better. Without feature sets the baseline is compared with itself.
    pub fn calc_wx_test_and_average_delta(&mut self) {
        let set_count = self.feature_set_count();
        let metric_count = self.metric_names.len();
        self.wx_test = vec![1.0; set_count];
        self.average_metric_delta = vec![vec![0.0; metric_count]; set_count];

        let empty: Vec<Vec<f64>> = Vec::new();
        for set_idx in 0..set_count {
            let baseline = self.best_metrics[0].get(set_idx).unwrap_or(&empty);
            let tested = if self.feature_sets.is_empty() {
                baseline
            } else {
                self.best_metrics[1].get(set_idx).unwrap_or(&empty)
            };
            if let (Some(baseline_loss), Some(tested_loss)) = (baseline.first(), tested.first()) {
                self.wx_test[set_idx] = wx_test(baseline_loss, tested_loss).p_value;
            }

            for metric_idx in 0..metric_count {
                let (Some(base), Some(test)) = (baseline.get(metric_idx), tested.get(metric_idx)) else {
                    continue;
                };
                let fold_count = base.len();
                if fold_count == 0 {
                    continue;
                }
                let base_avg = base.iter().sum::<f64>() / fold_count as f64;
                let test_avg = test.iter().sum::<f64>() / fold_count as f64;
                self.average_metric_delta[set_idx][metric_idx] = match self.metric_directions[metric_idx] {
                    Direction::Minimize => base_avg - test_avg,
                    Direction::Maximize => test_avg - base_avg,
                };
            }
        }
    }

    /// `[fold]` metric histories of one slot.
    pub fn metrics_history(&self, is_test: bool, set_idx: usize) -> &[MetricsHistory] {
        self.metrics_history[usize::from(is_test)]
            .get(set_idx)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// `[metric][fold]` best-iteration values of one slot.
    pub fn best_metrics(&self, is_test: bool, set_idx: usize) -> &[Vec<f64>] {
        self.best_metrics[usize::from(is_test)]
            .get(set_idx)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn best_baseline_iterations(&self, set_idx: usize) -> &[u32] {
        self.best_baseline_iterations
            .get(set_idx)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn feature_strengths(&self, is_test: bool, set_idx: usize) -> &[FeatureStrengths] {
        self.feature_strengths[usize::from(is_test)]
            .get(set_idx)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn regular_feature_strengths(&self, is_test: bool, set_idx: usize) -> &[FeatureStrengths] {
        self.regular_feature_strengths[usize::from(is_test)]
            .get(set_idx)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Per-set p-values; empty before [`Self::calc_wx_test_and_average_delta`].
    pub fn wx_test(&self) -> &[f64] {
        &self.wx_test
    }

    pub fn average_metric_delta(&self, set_idx: usize) -> &[f64] {
        self.average_metric_delta
            .get(set_idx)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Write per-fold logs of one training kind for the absolute folds
    /// `[absolute_begin, absolute_begin + fold_count)`.
    ///
    /// Every fold directory gets the test metric history and, when recorded,
    /// feature strengths. Shared baselines are read from set 0.
    pub fn write_fold_logs(
        &self,
        train_dir: &Path,
        mode: FeatureEvalMode,
        is_test: bool,
        absolute_begin: u32,
        fold_count: u32,
        absolute_offset: u32,
    ) -> Result<()> {
        let use_set_zero = !is_test && mode.has_shared_baseline();
        let has_sets = !self.feature_sets.is_empty();
        for set_idx in 0..self.feature_set_count() {
            let source_set = if use_set_zero { 0 } else { set_idx };
            for fold_idx in absolute_begin..absolute_begin + fold_count {
                let Some(pos) = fold_idx.checked_sub(absolute_offset).map(|p| p as usize) else {
                    return Err(EvalError::Internal(format!(
                        "Fold {fold_idx} precedes evaluation offset {absolute_offset}"
                    )));
                };
                let history = self
                    .metrics_history(is_test, source_set)
                    .get(pos)
                    .ok_or_else(|| EvalError::Internal(format!("No metric history for fold {fold_idx}")))?;

                let dir = train_dir.join(fold_dir_name(mode, has_sets, is_test, set_idx, fold_idx));
                fs::create_dir_all(&dir)?;
                self.write_history(&dir.join(TEST_ERROR_FILE), history)?;
                if let Some(strengths) = self.feature_strengths(is_test, source_set).get(pos) {
                    write_strengths(&dir.join(FSTR_FILE), strengths)?;
                }
                if let Some(strengths) = self.regular_feature_strengths(is_test, source_set).get(pos) {
                    write_strengths(&dir.join(REGULAR_FSTR_FILE), strengths)?;
                }
            }
        }
        Ok(())
    }

    fn write_history(&self, path: &Path, history: &[Vec<f64>]) -> Result<()> {
        let mut out = BufWriter::new(fs::File::create(path)?);
        write!(out, "iter")?;
        for name in &self.metric_names {
            write!(out, "\t{name}")?;
        }
        writeln!(out)?;
        for (iteration, values) in history.iter().enumerate() {
            write!(out, "{iteration}")?;
            for value in values {
                write!(out, "\t{value}")?;
            }
            writeln!(out)?;
        }
        out.flush()?;
        Ok(())
    }
}

fn write_strengths(path: &Path, strengths: &[(f64, u32)]) -> Result<()> {
    let mut out = BufWriter::new(fs::File::create(path)?);
    for (strength, feature) in strengths {
        writeln!(out, "{strength}\t{feature}")?;
    }
    out.flush()?;
    Ok(())
}

fn join<T: fmt::Display>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Tab-separated report, one row per feature set.
impl fmt::Display for FeatureEvaluationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p-value\tbest iteration in each fold\t")?;
        for name in &self.metric_names {
            write!(f, "{name}\t")?;
        }
        writeln!(f, "feature set")?;

        for set_idx in 0..self.feature_set_count() {
            let p_value = self.wx_test.get(set_idx).copied().unwrap_or(1.0);
            write!(f, "{p_value}\t{}\t", join(self.best_baseline_iterations(set_idx)))?;
            for delta in self.average_metric_delta(set_idx) {
                write!(f, "{delta}\t")?;
            }
            if let Some(set) = self.feature_sets.get(set_idx) {
                write!(f, "{}", join(set))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

//! Evaluation progress logging with verbosity levels.
//!
//! Messages go through `tracing`; installing a subscriber is left to the
//! application. Warnings are emitted regardless of verbosity.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Verbosity level of the evaluator's own output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Verbosity {
    #[default]
    Silent,
    Warning,
    Info,
    Debug,
}

/// Logger for per-run, per-fold and per-iteration progress.
#[derive(Debug, Clone, Copy)]
pub struct EvalLogger {
    verbosity: Verbosity,
}

impl EvalLogger {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    fn enabled(&self, level: Verbosity) -> bool {
        self.verbosity >= level
    }

    /// Log the fold geometry chosen for the run.
    pub fn log_geometry(&self, fold_size: u32, disjoint_fold_count: u32, n_ranges: u32) {
        if self.enabled(Verbosity::Info) {
            tracing::info!(
                fold_size,
                disjoint_fold_count,
                n_ranges,
                "Evaluating {n_ranges} fold range(s) of {disjoint_fold_count} disjoint folds, fold size {fold_size}"
            );
        }
    }

    /// Log the features hidden on top of the dataset's own ignored features.
    pub fn log_projection(&self, set_idx: usize, kind: &str, ignored: &[u32]) {
        if !self.enabled(Verbosity::Info) {
            return;
        }
        if ignored.is_empty() {
            tracing::info!("Feature set {set_idx}, {kind}, no additional ignored features");
        } else {
            let joined = ignored
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(":");
            tracing::info!("Feature set {set_idx}, {kind}, additional ignored features {joined}");
        }
    }

    pub fn log_fold_built(&self, fold_idx: u32, elapsed: Duration) {
        if self.enabled(Verbosity::Info) {
            tracing::info!(
                fold_idx,
                "Fold {fold_idx}: model built in {:.2} sec",
                elapsed.as_secs_f64()
            );
        }
    }

    pub fn log_skipped(&self, set_idx: usize, kind: &str, fold_idx: u32) {
        if self.enabled(Verbosity::Debug) {
            tracing::debug!("Feature set {set_idx}, {kind}, fold {fold_idx}: restored from snapshot");
        }
    }

    pub fn log_snapshot_saved(&self, path: &std::path::Path) {
        if self.enabled(Verbosity::Debug) {
            tracing::debug!(path = %path.display(), "Snapshot saved");
        }
    }

    /// Degenerate feature set warning. Always emitted.
    pub fn warn_degenerate_set(&self, set_idx: usize) {
        tracing::warn!(
            "Feature set {set_idx} consists of ignored or constant features; \
             eval feature assumes baseline data = testing data for this feature set"
        );
    }
}

/// Rate-limited "Train iteration i of n" messages.
#[derive(Debug)]
pub struct Heartbeat {
    period: Duration,
    last: Instant,
    enabled: bool,
}

impl Heartbeat {
    pub fn new(verbosity: Verbosity) -> Self {
        Self::with_period(verbosity, Duration::from_secs(1))
    }

    pub fn with_period(verbosity: Verbosity, period: Duration) -> Self {
        Self {
            period,
            last: Instant::now(),
            enabled: verbosity >= Verbosity::Info,
        }
    }

    /// Record iteration `iteration` of `total`; logs at most once per period.
    ///
    /// Returns whether a message was emitted.
    pub fn tick(&mut self, iteration: u32, total: u32) -> bool {
        if !self.enabled || self.last.elapsed() < self.period {
            return false;
        }
        tracing::info!("Train iteration {iteration} of {total}");
        self.last = Instant::now();
        true
    }

    /// Restart the period, e.g. when a new fold starts.
    pub fn reset(&mut self) {
        self.last = Instant::now();
    }
}

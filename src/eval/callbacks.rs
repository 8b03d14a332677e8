//! Checkpoint and resume bookkeeping.
//!
//! Progress is tracked as a [`ProgressMarker`], the last completed
//! `(fold_range_begin, feature_set_idx, is_test, fold_idx)` tuple. The
//! evaluator visits tuples in increasing lexicographic order, so after a
//! restart every tuple up to the saved marker is already in the restored
//! summary and can be skipped.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::logger::{Heartbeat, Verbosity};
use super::options::FeatureEvalOptions;
use super::snapshot::{self, SnapshotRef};
use super::summary::FeatureEvaluationSummary;
use crate::booster::TrainingCallbacks;
use crate::error::{ensure_config, EvalError, Result};

/// Position of one fold training in the evaluation order.
///
/// Field order defines the lexicographic order used for resume decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProgressMarker {
    pub fold_range_begin: u32,
    pub feature_set_idx: u32,
    pub is_test: bool,
    pub fold_idx: u32,
}

impl ProgressMarker {
    pub fn new(fold_range_begin: u32, feature_set_idx: u32, is_test: bool, fold_idx: u32) -> Self {
        Self {
            fold_range_begin,
            feature_set_idx,
            is_test,
            fold_idx,
        }
    }
}

/// Whether a restored snapshot still decides what to skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeState {
    /// Nothing restored, or the restored progress has been passed.
    Active,
    /// A snapshot was loaded; tuples up to its marker are skipped.
    AwaitingFirstComparison,
}

/// Snapshot persistence and resume decisions for one evaluation run.
#[derive(Debug)]
pub struct FeatureEvaluationCallbacks {
    options: FeatureEvalOptions,
    snapshot_path: Option<PathBuf>,
    marker: Option<ProgressMarker>,
    state: ResumeState,
}

impl FeatureEvaluationCallbacks {
    /// `snapshot_path` enables snapshotting.
    pub fn new(options: FeatureEvalOptions, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            options,
            snapshot_path,
            marker: None,
            state: ResumeState::Active,
        }
    }

    pub fn state(&self) -> ResumeState {
        self.state
    }

    pub fn marker(&self) -> Option<ProgressMarker> {
        self.marker
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Restore `summary` from the snapshot file if snapshotting is enabled
    /// and the file exists. Returns whether a snapshot was loaded.
    ///
    /// # Errors
    ///
    /// A snapshot written with different options is a configuration error.
    pub fn load_snapshot(&mut self, summary: &mut FeatureEvaluationSummary) -> Result<bool> {
        let Some(path) = self.snapshot_path.as_deref() else {
            return Ok(false);
        };
        if !path.exists() {
            return Ok(false);
        }

        let restored = snapshot::load_snapshot(path)?;
        ensure_config!(
            restored.options == self.options,
            "Current feature evaluation options differ from options in snapshot"
        );
        *summary = restored.summary;
        self.marker = restored.marker;
        self.state = ResumeState::AwaitingFirstComparison;
        tracing::info!(path = %path.display(), marker = ?self.marker, "Resuming feature evaluation from snapshot");
        Ok(true)
    }

    /// Whether the restored summary already holds the result for `progress`.
    ///
    /// The first tuple past the restored marker switches the state to
    /// [`ResumeState::Active`]; nothing is skipped after that.
    pub fn has_result(&mut self, progress: ProgressMarker) -> Result<bool> {
        match self.state {
            ResumeState::Active => Ok(false),
            ResumeState::AwaitingFirstComparison => {
                let saved = self.marker.ok_or_else(|| {
                    EvalError::Internal(
                        "No fold range begin, or feature set index, or baseline flag, or fold index in snapshot"
                            .into(),
                    )
                })?;
                if progress <= saved {
                    Ok(true)
                } else {
                    self.state = ResumeState::Active;
                    Ok(false)
                }
            }
        }
    }

    /// Record `progress` as completed and persist the summary if
    /// snapshotting is enabled.
    pub fn on_fold_completed(
        &mut self,
        summary: &FeatureEvaluationSummary,
        progress: ProgressMarker,
    ) -> Result<()> {
        self.marker = Some(progress);
        if let Some(path) = self.snapshot_path.as_deref() {
            snapshot::save_snapshot(
                path,
                SnapshotRef {
                    summary,
                    marker: self.marker,
                    options: &self.options,
                },
            )?;
        }
        Ok(())
    }
}

/// Per-training callbacks: count iterations and emit a heartbeat.
#[derive(Debug)]
pub struct IterationCallbacks {
    iteration: u32,
    iteration_count: u32,
    heartbeat: Heartbeat,
}

impl IterationCallbacks {
    pub fn new(iteration_count: u32, verbosity: Verbosity) -> Self {
        Self {
            iteration: 0,
            iteration_count,
            heartbeat: Heartbeat::new(verbosity),
        }
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }
}

impl TrainingCallbacks for IterationCallbacks {
    fn is_continue_training(&mut self) -> bool {
        self.iteration += 1;
        self.heartbeat.tick(self.iteration, self.iteration_count);
        true
    }
}

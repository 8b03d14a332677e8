//! Feature evaluation options with builder pattern.
//!
//! [`FeatureEvalOptions`] describes *what* is evaluated: the candidate
//! feature sets, the ablation mode and the fold geometry. The options are
//! stored in every snapshot and a resumed run must use identical options.
//!
//! # Example
//!
//! ```
//! use boosters_eval::eval::{FeatureEvalMode, FeatureEvalOptions};
//!
//! let options = FeatureEvalOptions::builder()
//!     .features_to_evaluate(vec![vec![0, 1], vec![4]])
//!     .mode(FeatureEvalMode::OneVsOthers)
//!     .fold_count(5)
//!     .build()
//!     .unwrap();
//! assert!(options.shuffle);
//! ```

use std::path::PathBuf;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::booster::FstrKind;
use crate::data::SamplingUnit;
use crate::error::ConfigError;
use crate::folds::{CrossValidationKind, CvParams};

/// How baseline and testing models differ for a tested feature set.
///
/// | Mode | Baseline hides | Testing hides |
/// |---|---|---|
/// | `OneVsAll` | nothing | nothing |
/// | `OneVsNone` | every candidate set | nothing |
/// | `OneVsOthers` | the tested set | nothing |
/// | `OthersVsAll` | nothing | the tested set |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeatureEvalMode {
    #[default]
    OneVsNone,
    OneVsOthers,
    OneVsAll,
    OthersVsAll,
}

impl FeatureEvalMode {
    /// Whether one baseline serves every feature set.
    pub fn has_shared_baseline(self) -> bool {
        self != FeatureEvalMode::OneVsOthers
    }
}

/// Options of one feature evaluation run.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(
    derive(Clone, Debug),
    finish_fn(vis = "", name = __build_internal)
)]
pub struct FeatureEvalOptions {
    // === What to evaluate ===
    /// Candidate feature sets. Empty evaluates the baseline only.
    #[builder(default)]
    pub features_to_evaluate: Vec<Vec<u32>>,

    /// Ablation mode. Default: `OneVsNone`.
    #[builder(default)]
    pub mode: FeatureEvalMode,

    // === Fold geometry ===
    /// Unit in which fold sizes are measured. Default: objects.
    #[builder(default)]
    pub fold_size_unit: SamplingUnit,

    /// Absolute fold size in units. 0 derives it from `relative_fold_size`.
    #[builder(default)]
    pub fold_size: u32,

    /// Fold size as a fraction of all units. Default: 0.2.
    #[builder(default = 0.2)]
    pub relative_fold_size: f32,

    /// Number of folds to evaluate. Default: 5.
    #[builder(default = 5)]
    pub fold_count: u32,

    /// Index of the first evaluated fold across consecutive fold ranges.
    #[builder(default)]
    pub offset: u32,

    /// Timestamp quantile separating training and test data in time-split
    /// mode. Default: 0.95.
    #[builder(default = 0.95)]
    pub time_split_quantile: f64,

    /// K-fold cross-validation. Replaces the fixed-size geometry when set.
    pub cv: Option<CvParams>,

    /// Shuffle group order per fold range. Default: true.
    #[builder(default = true)]
    pub shuffle: bool,

    // === Execution ===
    /// Train the folds of one (set, kind) group concurrently.
    #[builder(default)]
    pub parallel_folds: bool,

    /// Run seed. Default: 0.
    #[builder(default)]
    pub seed: u64,
}

/// Files produced by a run. Nothing is written by default.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutputOptions {
    /// Root directory of the per-fold training directories and logs.
    pub train_dir: Option<PathBuf>,
    /// Snapshot file. Enables checkpointing and resume when set.
    pub snapshot_path: Option<PathBuf>,
    /// Record internal feature strengths per fold.
    pub calc_fstr: bool,
    /// Record regular (normalized, all-feature) strengths per fold.
    pub calc_regular_fstr: bool,
    /// Strength flavour used for both.
    pub fstr_kind: FstrKind,
}

impl OutputOptions {
    pub fn wants_fstr(&self) -> bool {
        self.calc_fstr || self.calc_regular_fstr
    }
}

/// Custom finishing function that validates the options.
impl<S: feature_eval_options_builder::IsComplete> FeatureEvalOptionsBuilder<S> {
    /// Build and validate the options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for zero fold counts, ratios outside (0, 1],
    /// quantiles outside [0, 1], empty feature sets or unsupported
    /// cross-validation settings.
    pub fn build(self) -> Result<FeatureEvalOptions, ConfigError> {
        let options = self.__build_internal();
        options.validate()?;
        Ok(options)
    }
}

impl Default for FeatureEvalOptions {
    fn default() -> Self {
        Self::builder().__build_internal()
    }
}

impl FeatureEvalOptions {
    /// Check option consistency. Fields are public, so the evaluator checks
    /// again before running.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if let Some(idx) = self.features_to_evaluate.iter().position(|set| set.is_empty()) {
            return Err(ConfigError::EmptyFeatureSet(idx));
        }

        if let Some(cv) = &self.cv {
            if cv.kind != CrossValidationKind::Inverted {
                return Err(ConfigError::UnsupportedCrossValidation);
            }
            if cv.fold_count == 0 {
                return Err(ConfigError::NotPositive { field: "cv.fold_count" });
            }
            if self.offset != 0 {
                return Err(ConfigError::OffsetWithCrossValidation(self.offset));
            }
            return Ok(());
        }

        if self.fold_count == 0 {
            return Err(ConfigError::NotPositive { field: "fold_count" });
        }
        if self.fold_size == 0 && !(self.relative_fold_size > 0.0 && self.relative_fold_size <= 1.0) {
            return Err(ConfigError::InvalidRatio {
                field: "relative_fold_size",
                value: f64::from(self.relative_fold_size),
            });
        }
        if !(0.0..=1.0).contains(&self.time_split_quantile) {
            return Err(ConfigError::InvalidQuantile(self.time_split_quantile));
        }
        Ok(())
    }

    /// Number of folds evaluated by the run.
    pub fn effective_fold_count(&self) -> u32 {
        self.cv.as_ref().map_or(self.fold_count, |cv| cv.fold_count)
    }

    /// Number of summary slots: one per feature set, at least one.
    pub fn feature_set_count(&self) -> usize {
        self.features_to_evaluate.len().max(1)
    }
}

//! Feature evaluation: repeated cross-validated ablation of feature sets.
//!
//! The entry point is [`FeatureEvaluator`] (or [`evaluate_features`]). For
//! every fold of every fold range it trains a *baseline* and a *testing*
//! model whose visible features differ by a candidate feature set
//! ([`FeatureEvalMode`]), records per-iteration test metrics in a
//! [`FeatureEvaluationSummary`], and checkpoints progress after each fold.
//!
//! # Modules
//!
//! - [`options`]: what to evaluate and the fold geometry
//! - [`projector`]: features hidden per (mode, kind, set)
//! - [`callbacks`]: resume decisions and iteration callbacks
//! - [`snapshot`]: binary checkpoint format
//! - [`summary`]: results, statistics and the TSV report

pub mod callbacks;
mod evaluator;
mod fold;
pub mod logger;
pub mod options;
pub mod projector;
pub mod snapshot;
pub mod summary;

pub use callbacks::{FeatureEvaluationCallbacks, IterationCallbacks, ProgressMarker, ResumeState};
pub use evaluator::{evaluate_features, FeatureEvaluator};
pub use fold::{FoldContext, TrainingKind};
pub use logger::{EvalLogger, Verbosity};
pub use options::{FeatureEvalMode, FeatureEvalOptions, OutputOptions};
pub use projector::ignored_features;
pub use snapshot::{load_snapshot, save_snapshot, Snapshot, SnapshotError};
pub use summary::{best_iteration, fold_dir_name, FeatureEvaluationSummary, FeatureStrengths, MetricsHistory};

//! boosters-eval: checkpointable cross-validated feature evaluation for
//! gradient-boosted trees.
//!
//! Given a dataset, candidate feature sets and a trainer, the crate decides
//! whether each feature set changes model quality by a statistically
//! significant margin across many resampled folds. Long runs checkpoint after
//! every fold and resume from the last completed one.
//!
//! ```no_run
//! use boosters_eval::booster::{BoostingParams, StumpBooster};
//! use boosters_eval::data::Dataset;
//! use boosters_eval::eval::{FeatureEvalMode, FeatureEvalOptions, FeatureEvaluator, OutputOptions};
//! use boosters_eval::metrics::Metric;
//!
//! # fn run(dataset: Dataset) -> boosters_eval::Result<()> {
//! let options = FeatureEvalOptions::builder()
//!     .features_to_evaluate(vec![vec![0, 1], vec![5]])
//!     .mode(FeatureEvalMode::OneVsOthers)
//!     .fold_count(10)
//!     .build()?;
//! let output = OutputOptions {
//!     snapshot_path: Some("eval.snapshot".into()),
//!     ..Default::default()
//! };
//! let trainer = StumpBooster::new(BoostingParams::default());
//! let summary = FeatureEvaluator::new(trainer, vec![Metric::rmse(), Metric::mae()], options)
//!     .with_output(output)
//!     .evaluate(&dataset)?;
//! print!("{summary}");
//! # Ok(())
//! # }
//! ```

pub mod booster;
pub mod data;
pub mod error;
pub mod eval;
pub mod folds;
pub mod metrics;
pub mod stats;
pub mod utils;

pub use error::{ConfigError, EvalError, Result};
pub use eval::{evaluate_features, FeatureEvalMode, FeatureEvalOptions, FeatureEvaluationSummary, FeatureEvaluator};
pub use utils::{ExecutionContext, Parallelism};

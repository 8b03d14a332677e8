//! Training collaborators driven by the evaluator.
//!
//! - [`Trainer`]: trains one fold, filling the fold's model and metric history
//! - [`TrainingCallbacks`]: per-iteration hook the trainer must call
//! - [`StumpBooster`]: reference trainer (gradient-boosted stumps)
//! - [`FeatureStrength`]: per-feature importance of a trained [`Forest`]

mod forest;
mod fstr;
mod trainer;

use std::path::Path;

pub use forest::{Forest, ForestValidationError, Tree};
pub use fstr::{FeatureStrength, FstrKind};
pub use trainer::{BoostingParams, Objective, StumpBooster};

use crate::data::DatasetView;
use crate::error::Result;
use crate::eval::FoldContext;
use crate::metrics::Metric;
use crate::utils::Parallelism;

/// Hook invoked by the trainer at the start of every iteration.
pub trait TrainingCallbacks {
    /// Whether training should run the next iteration.
    fn is_continue_training(&mut self) -> bool;
}

/// A model trainer.
///
/// Implementations train on `fold.learn`, store the model in `fold.model` and
/// append one row of metric values per iteration to `fold.metrics_on_train`.
/// They may fill `fold.metrics_on_test`; when they don't, the evaluator
/// scores the test view itself. `callbacks.is_continue_training()` must be
/// called once per iteration.
pub trait Trainer: Sync {
    /// Approx dimension of the models this trainer produces.
    fn approx_dimension(&self) -> u32;

    /// Number of iterations a full training run performs.
    fn iteration_count(&self) -> u32;

    fn train<D: DatasetView>(
        &self,
        train_dir: Option<&Path>,
        metrics: &[Metric],
        fold: &mut FoldContext<D>,
        callbacks: &mut dyn TrainingCallbacks,
        parallelism: Parallelism,
    ) -> Result<()>;
}

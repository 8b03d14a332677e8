//! Per-fold training state.

use serde::{Deserialize, Serialize};

use crate::booster::Forest;
use crate::data::DatasetView;

/// Which model of a comparison a fold trains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingKind {
    /// Model trained without the tested feature set (mode-dependent).
    Baseline,
    /// Model trained with the tested feature set (mode-dependent).
    Testing,
}

impl TrainingKind {
    /// Summary slot index: 0 for baseline, 1 for testing.
    #[inline]
    pub fn is_test(self) -> bool {
        self == TrainingKind::Testing
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TrainingKind::Baseline => "baseline",
            TrainingKind::Testing => "testing",
        }
    }
}

/// Everything a trainer needs for one fold, plus what it produces.
///
/// The evaluator owns the context for the duration of one training run.
/// `learn` and `test` are taken back afterwards and reused by the next
/// feature set.
#[derive(Debug, Clone)]
pub struct FoldContext<D> {
    /// Absolute fold index.
    pub fold_idx: u32,
    pub learn: D,
    pub test: D,
    /// Seed for the trainer's own randomness.
    pub seed: u64,
    /// Trained model, set by the trainer.
    pub model: Option<Forest>,
    /// `[iteration][metric]` on the learn view.
    pub metrics_on_train: Vec<Vec<f64>>,
    /// `[iteration][metric]` on the test view. Filled by the trainer or,
    /// when it leaves this empty, by the evaluator.
    pub metrics_on_test: Vec<Vec<f64>>,
}

impl<D: DatasetView> FoldContext<D> {
    pub fn new(fold_idx: u32, learn: D, test: D, seed: u64) -> Self {
        Self {
            fold_idx,
            learn,
            test,
            seed,
            model: None,
            metrics_on_train: Vec::new(),
            metrics_on_test: Vec::new(),
        }
    }

    /// Hand the views back, dropping training results.
    pub fn into_views(self) -> (D, D) {
        (self.learn, self.test)
    }
}

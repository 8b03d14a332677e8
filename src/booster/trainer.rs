//! Gradient boosting of depth-1 regression trees.
//!
//! [`StumpBooster`] is the reference [`Trainer`]: each iteration fits one
//! threshold split on the current gradients (second-order gain with L2 leaf
//! regularization), appends it to the forest and re-scores the learn set.
//! Train metrics are recorded for every iteration; test metrics are left to
//! the caller.

use std::path::Path;

use bon::Builder;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use super::forest::{Forest, Tree};
use super::{Trainer, TrainingCallbacks};
use crate::data::DatasetView;
use crate::error::{ConfigError, Result};
use crate::eval::FoldContext;
use crate::metrics::{Metric, MetricFn};
use crate::utils::Parallelism;

const MIN_HESSIAN: f64 = 1e-6;

// =============================================================================
// Objective
// =============================================================================

/// Training objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Objective {
    /// Squared error regression.
    #[default]
    SquaredLoss,
    /// Binary classification on 0/1 targets.
    Logistic,
}

impl Objective {
    /// Number of approx dimensions the objective produces.
    pub fn n_outputs(self) -> u32 {
        1
    }

    /// Optimal constant prediction.
    pub fn base_score(self, targets: &[f32]) -> f32 {
        if targets.is_empty() {
            return 0.0;
        }
        let mean = targets.iter().map(|&t| t as f64).sum::<f64>() / targets.len() as f64;
        match self {
            Self::SquaredLoss => mean as f32,
            Self::Logistic => {
                let p = mean.clamp(1e-6, 1.0 - 1e-6);
                (p / (1.0 - p)).ln() as f32
            }
        }
    }

    /// First and second derivatives of the loss at `approx`.
    #[inline]
    pub fn grad_hess(self, approx: f32, target: f32) -> (f64, f64) {
        let (a, t) = (approx as f64, target as f64);
        match self {
            Self::SquaredLoss => (a - t, 1.0),
            Self::Logistic => {
                let p = 1.0 / (1.0 + (-a).exp());
                (p - t, (p * (1.0 - p)).max(MIN_HESSIAN))
            }
        }
    }
}

// =============================================================================
// BoostingParams
// =============================================================================

/// Boosting hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(derive(Clone, Debug), finish_fn(vis = "", name = __build_internal))]
pub struct BoostingParams {
    /// Loss function. Default: `SquaredLoss`.
    #[builder(default)]
    pub objective: Objective,

    /// Number of boosting iterations (trees). Default: 100.
    #[builder(default = 100)]
    pub n_iterations: u32,

    /// Shrinkage applied to every leaf. Default: 0.3.
    #[builder(default = 0.3)]
    pub learning_rate: f32,

    /// L2 regularization on leaf values. Default: 1.0.
    #[builder(default = 1.0)]
    pub l2_leaf_reg: f32,

    /// Minimum objects on each side of a split. Default: 1.
    #[builder(default = 1)]
    pub min_data_in_leaf: u32,

    /// Fraction of available features considered per iteration. Default: 1.0.
    #[builder(default = 1.0)]
    pub feature_fraction: f32,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            objective: Objective::default(),
            n_iterations: 100,
            learning_rate: 0.3,
            l2_leaf_reg: 1.0,
            min_data_in_leaf: 1,
            feature_fraction: 1.0,
        }
    }
}

impl<S: boosting_params_builder::IsComplete> BoostingParamsBuilder<S> {
    /// Build and validate the parameters.
    pub fn build(self) -> std::result::Result<BoostingParams, ConfigError> {
        let params = self.__build_internal();
        params.validate()?;
        Ok(params)
    }
}

impl BoostingParams {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.learning_rate <= 0.0 {
            return Err(ConfigError::InvalidLearningRate(self.learning_rate));
        }
        if self.n_iterations == 0 {
            return Err(ConfigError::NotPositive {
                field: "n_iterations",
            });
        }
        if self.l2_leaf_reg < 0.0 {
            return Err(ConfigError::InvalidRegularization {
                field: "l2_leaf_reg",
                value: self.l2_leaf_reg,
            });
        }
        if self.min_data_in_leaf == 0 {
            return Err(ConfigError::NotPositive {
                field: "min_data_in_leaf",
            });
        }
        if !(self.feature_fraction > 0.0 && self.feature_fraction <= 1.0) {
            return Err(ConfigError::InvalidRatio {
                field: "feature_fraction",
                value: self.feature_fraction as f64,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Split search
// =============================================================================

/// Objects of one feature, sorted by value. NaN sorts first.
struct SortedFeature {
    feature: u32,
    order: Vec<u32>,
    values: Vec<f32>,
}

impl SortedFeature {
    fn new(feature: u32, raw: &[f32]) -> Self {
        let key = |v: f32| if v.is_nan() { f32::NEG_INFINITY } else { v };
        let mut order: Vec<u32> = (0..raw.len() as u32).collect();
        order.sort_by(|&a, &b| key(raw[a as usize]).total_cmp(&key(raw[b as usize])));
        let values = order.iter().map(|&o| key(raw[o as usize])).collect();
        Self {
            feature,
            order,
            values,
        }
    }

    fn best_split(&self, grad: &[f64], hess: &[f64], l2: f64, min_leaf: usize) -> Option<SplitCandidate> {
        let n = self.order.len();
        let (g_total, h_total) = self
            .order
            .iter()
            .fold((0.0, 0.0), |(g, h), &o| (g + grad[o as usize], h + hess[o as usize]));
        let parent = g_total * g_total / (h_total + l2);

        let mut best: Option<SplitCandidate> = None;
        let (mut g_left, mut h_left) = (0.0, 0.0);
        for i in 0..n.saturating_sub(1) {
            let o = self.order[i] as usize;
            g_left += grad[o];
            h_left += hess[o];
            let n_left = i + 1;
            if self.values[i] == self.values[i + 1] || n_left < min_leaf || n - n_left < min_leaf {
                continue;
            }
            let (g_right, h_right) = (g_total - g_left, h_total - h_left);
            let gain = g_left * g_left / (h_left + l2) + g_right * g_right / (h_right + l2) - parent;
            if gain > 0.0 && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(SplitCandidate {
                    feature: self.feature,
                    threshold: self.values[i],
                    gain,
                    sums: [g_left, h_left, g_right, h_right],
                });
            }
        }
        best
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: u32,
    threshold: f32,
    gain: f64,
    /// `[g_left, h_left, g_right, h_right]`
    sums: [f64; 4],
}

// =============================================================================
// StumpBooster
// =============================================================================

/// Reference trainer: gradient boosting of depth-1 trees.
#[derive(Debug, Clone, Default)]
pub struct StumpBooster {
    params: BoostingParams,
}

impl StumpBooster {
    pub fn new(params: BoostingParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &BoostingParams {
        &self.params
    }

    fn leaf_value(&self, g: f64, h: f64) -> f32 {
        (-(self.params.learning_rate as f64) * g / (h + self.params.l2_leaf_reg as f64)) as f32
    }
}

impl Trainer for StumpBooster {
    fn approx_dimension(&self) -> u32 {
        self.params.objective.n_outputs()
    }

    fn iteration_count(&self) -> u32 {
        self.params.n_iterations
    }

    fn train<D: DatasetView>(
        &self,
        _train_dir: Option<&Path>,
        metrics: &[Metric],
        fold: &mut FoldContext<D>,
        callbacks: &mut dyn TrainingCallbacks,
        parallelism: Parallelism,
    ) -> Result<()> {
        let learn = &fold.learn;
        let n_objects = learn.n_objects() as usize;
        let targets = learn.targets().to_vec();
        let objective = self.params.objective;
        let l2 = self.params.l2_leaf_reg as f64;
        let min_leaf = self.params.min_data_in_leaf as usize;

        let mut forest = Forest::new(objective.n_outputs())
            .with_base_score(vec![objective.base_score(&targets)]);
        let mut approx = forest.init_approx(n_objects);

        let available: Vec<u32> = (0..learn.n_features())
            .filter(|&f| learn.is_feature_available(f))
            .collect();
        let sorted: Vec<SortedFeature> = parallelism.maybe_par_map(&available, |&f| {
            SortedFeature::new(f, &learn.feature_values(f))
        });
        let n_sampled = ((sorted.len() as f64 * self.params.feature_fraction as f64).ceil() as usize)
            .clamp(usize::from(!sorted.is_empty()), sorted.len());

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(fold.seed);
        let mut grad = vec![0.0f64; n_objects];
        let mut hess = vec![0.0f64; n_objects];
        fold.metrics_on_train.clear();

        for _ in 0..self.params.n_iterations {
            if !callbacks.is_continue_training() {
                break;
            }

            for (i, (&a, &t)) in approx.row(0).iter().zip(&targets).enumerate() {
                let (g, h) = objective.grad_hess(a, t);
                grad[i] = g;
                hess[i] = h;
            }

            let mut candidates: Vec<&SortedFeature> = sorted.iter().collect();
            if n_sampled < candidates.len() {
                candidates.partial_shuffle(&mut rng, n_sampled);
                candidates.truncate(n_sampled);
                candidates.sort_by_key(|f| f.feature);
            }
            let splits = parallelism.maybe_par_map(&candidates, |f| {
                f.best_split(&grad, &hess, l2, min_leaf)
            });
            let best = splits
                .into_iter()
                .flatten()
                .fold(None::<SplitCandidate>, |best, s| match best {
                    Some(b) if b.gain >= s.gain => Some(b),
                    _ => Some(s),
                });

            let tree = match best {
                Some(split) => {
                    let [g_left, h_left, g_right, h_right] = split.sums;
                    Tree::Stump {
                        feature: split.feature,
                        threshold: split.threshold,
                        left: self.leaf_value(g_left, h_left),
                        right: self.leaf_value(g_right, h_right),
                        gain: split.gain,
                    }
                }
                None => Tree::Leaf {
                    value: self.leaf_value(grad.iter().sum(), hess.iter().sum()),
                },
            };
            forest.push_tree(tree, 0);
            forest.apply_tree(forest.n_trees() - 1, learn, &mut approx, parallelism)?;

            let targets_view = learn.targets();
            fold.metrics_on_train.push(
                metrics
                    .iter()
                    .map(|m| m.compute(approx.view(), targets_view))
                    .collect(),
            );
        }

        fold.model = Some(forest);
        Ok(())
    }
}

//! Evaluation orchestrator.
//!
//! For every fold range the dataset is (optionally) reshuffled and
//! partitioned once; the resulting learn/test views are shared by every
//! feature set and training kind. Each `(range, set, kind, fold)` training is
//! committed to the summary in a fixed order and checkpointed, so a restarted
//! run skips exactly the trainings already in the snapshot.

use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use super::callbacks::{FeatureEvaluationCallbacks, IterationCallbacks, ProgressMarker};
use super::fold::{FoldContext, TrainingKind};
use super::logger::{EvalLogger, Verbosity};
use super::options::{FeatureEvalOptions, OutputOptions};
use super::projector::ignored_features;
use super::summary::{fold_dir_name, FeatureEvaluationSummary, FeatureStrengths, MetricsHistory};
use crate::booster::{FeatureStrength, Trainer};
use crate::data::DatasetView;
use crate::error::{ensure_config, ensure_internal, EvalError, Result};
use crate::folds::{
    count_disjoint_folds, fold_range_count, make_folds, plan_fold_ranges, shuffled_objects, FoldRange,
    FoldSpec, Partitioning,
};
use crate::metrics::{metric_directions, Metric, MetricFn};
use crate::utils::{ExecutionContext, Parallelism};

/// Learn/test views of every fold; `None` while a fold is being trained.
type FoldViews<D> = Vec<Option<(D, D)>>;

/// Output of one fold training, not yet committed to the summary.
struct TrainedFold<D> {
    fold: usize,
    marker: ProgressMarker,
    context: FoldContext<D>,
    elapsed: Duration,
    strengths: Option<FeatureStrengths>,
    regular_strengths: Option<FeatureStrengths>,
}

/// One fold range with its partitioning and seed.
#[derive(Debug, Clone, Copy)]
struct RangePlan {
    range: FoldRange,
    partitioning: Partitioning,
    seed: u64,
}

/// Runs a complete feature evaluation with a given trainer and metrics.
///
/// # Example
///
/// ```no_run
/// use boosters_eval::booster::{BoostingParams, StumpBooster};
/// use boosters_eval::data::Dataset;
/// use boosters_eval::eval::{FeatureEvalOptions, FeatureEvaluator};
/// use boosters_eval::metrics::Metric;
///
/// # fn run(dataset: Dataset) -> boosters_eval::Result<()> {
/// let trainer = StumpBooster::new(BoostingParams::builder().n_iterations(50).build()?);
/// let options = FeatureEvalOptions::builder()
///     .features_to_evaluate(vec![vec![3]])
///     .build()?;
/// let summary = FeatureEvaluator::new(trainer, vec![Metric::rmse()], options).evaluate(&dataset)?;
/// println!("{summary}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FeatureEvaluator<T> {
    trainer: T,
    metrics: Vec<Metric>,
    options: FeatureEvalOptions,
    output: OutputOptions,
    n_threads: usize,
    memory_budget: u64,
    verbosity: Verbosity,
}

impl<T: Trainer> FeatureEvaluator<T> {
    /// Evaluator with no output files, all cores and no memory limit.
    pub fn new(trainer: T, metrics: Vec<Metric>, options: FeatureEvalOptions) -> Self {
        Self {
            trainer,
            metrics,
            options,
            output: OutputOptions::default(),
            n_threads: 0,
            memory_budget: u64::MAX,
            verbosity: Verbosity::default(),
        }
    }

    pub fn with_output(mut self, output: OutputOptions) -> Self {
        self.output = output;
        self
    }

    /// Thread count: 0 = all cores, 1 = sequential.
    pub fn with_n_threads(mut self, n_threads: usize) -> Self {
        self.n_threads = n_threads;
        self
    }

    /// Upper bound in bytes for materialized dataset subsets.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = bytes;
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn options(&self) -> &FeatureEvalOptions {
        &self.options
    }

    pub fn trainer(&self) -> &T {
        &self.trainer
    }

    /// Run the whole evaluation and return the finished summary.
    ///
    /// Resumes from the snapshot when one is configured and present.
    pub fn evaluate<D: DatasetView>(&self, dataset: &D) -> Result<FeatureEvaluationSummary> {
        let context = ExecutionContext::new(self.n_threads)?;
        context.install(|parallelism| self.evaluate_in(dataset, parallelism))
    }

    fn evaluate_in<D: DatasetView>(&self, dataset: &D, parallelism: Parallelism) -> Result<FeatureEvaluationSummary> {
        let options = &self.options;
        let logger = EvalLogger::new(self.verbosity);
        options.validate()?;
        metric_directions(&self.metrics)?;
        ensure_config!(
            !dataset.is_ordered(),
            "Feature evaluation for ordered objects data is not yet implemented"
        );
        let n_features = dataset.n_features();
        for &feature in options.features_to_evaluate.iter().flatten() {
            ensure_config!(
                feature < n_features,
                "Feature index {feature} in features to evaluate is out of range (dataset has {n_features} features)"
            );
        }

        let plans = self.plan(dataset, &logger)?;

        let mut summary = FeatureEvaluationSummary::default();
        let mut callbacks = FeatureEvaluationCallbacks::new(options.clone(), self.output.snapshot_path.clone());
        callbacks.load_snapshot(&mut summary)?;

        for plan in &plans {
            self.run_fold_range(dataset, plan, &logger, &mut callbacks, &mut summary, parallelism)?;
        }

        summary.calc_wx_test_and_average_delta();
        Ok(summary)
    }

    /// Resolve fold geometry into per-range partitionings and seeds.
    fn plan<D: DatasetView>(&self, dataset: &D, logger: &EvalLogger) -> Result<Vec<RangePlan>> {
        let options = &self.options;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(options.seed);

        if let Some(cv) = options.cv {
            let range = plan_fold_ranges(cv.fold_count, 0, cv.fold_count)
                .into_iter()
                .next()
                .ok_or_else(|| EvalError::Internal("Cross-validation produced no fold range".into()))?;
            logger.log_geometry(0, cv.fold_count, 1);
            return Ok(vec![RangePlan {
                range,
                partitioning: Partitioning::KFold {
                    fold_count: cv.fold_count,
                },
                seed: rng.gen(),
            }]);
        }

        let timestamps = dataset.timestamps();
        if timestamps.is_some() {
            ensure_config!(
                dataset.group_ids().is_some(),
                "Timesplit feature evaluation requires dataset with groups"
            );
        }
        let geometry = count_disjoint_folds(
            dataset.grouping(),
            timestamps,
            options.fold_size_unit,
            options.fold_size,
            options.relative_fold_size,
            options.time_split_quantile,
        )?;
        let fold_count = options.fold_count;
        ensure_config!(
            options.shuffle || options.offset + fold_count <= geometry.disjoint_fold_count,
            "Dataset contains too few objects or groups to evaluate features without shuffling. \
             Please decrease fold size to at most {}, or enable dataset shuffling",
            geometry.n_units / (options.offset + fold_count)
        );

        let n_ranges = fold_range_count(geometry.disjoint_fold_count, options.offset, fold_count);
        let seeds: Vec<u64> = (0..n_ranges).map(|_| rng.gen()).collect();
        logger.log_geometry(geometry.fold_size, geometry.disjoint_fold_count, n_ranges);

        plan_fold_ranges(geometry.disjoint_fold_count, options.offset, fold_count)
            .into_iter()
            .map(|range| -> Result<RangePlan> {
                let partitioning = match timestamps {
                    Some(_) => Partitioning::TimeSplit {
                        unit: options.fold_size_unit,
                        fold_size: geometry.fold_size,
                        offset: range.offset,
                        fold_count: range.fold_count,
                        quantile: options.time_split_quantile,
                    },
                    None => Partitioning::FixedSize {
                        unit: options.fold_size_unit,
                        fold_size: geometry.fold_size,
                        offset: range.offset,
                        fold_count: range.fold_count,
                    },
                };
                let seed = *seeds.get(range.index as usize).ok_or_else(|| {
                    EvalError::Internal(format!("No seed for fold range {}", range.index))
                })?;
                Ok(RangePlan {
                    range,
                    partitioning,
                    seed,
                })
            })
            .collect()
    }

    /// Train and score every pending `(set, kind, fold)` of one fold range.
    fn run_fold_range<D: DatasetView>(
        &self,
        dataset: &D,
        plan: &RangePlan,
        logger: &EvalLogger,
        callbacks: &mut FeatureEvaluationCallbacks,
        summary: &mut FeatureEvaluationSummary,
        parallelism: Parallelism,
    ) -> Result<()> {
        let options = &self.options;
        let range = &plan.range;
        let fold_count = range.fold_count;
        ensure_config!(
            dataset.n_objects() > options.effective_fold_count() && dataset.n_objects() > options.fold_size,
            "Pool is too small to be split into folds"
        );

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(plan.seed);
        let shuffle_seed: u64 = rng.gen();
        let set_count = options.feature_set_count();
        let fold_seeds: Vec<u64> = (0..set_count * 2 * fold_count as usize)
            .map(|_| rng.gen())
            .collect();

        let shuffled;
        let data = if options.shuffle {
            let permutation = shuffled_objects(dataset.grouping(), shuffle_seed);
            shuffled = dataset.subset(&permutation, self.memory_budget)?;
            &shuffled
        } else {
            dataset
        };

        let folds = make_folds(data.grouping(), data.timestamps(), &plan.partitioning)?;
        ensure_internal!(
            folds.len() == fold_count as usize,
            "Expected {fold_count} folds, partitioning produced {}",
            folds.len()
        );
        let fold_data = self.create_fold_data(data, &folds, parallelism)?;

        if !summary.has_header_info() {
            summary.set_header_info(&self.metrics, &options.features_to_evaluate)?;
        }

        let ctx = RangeContext {
            range,
            fold_seeds: &fold_seeds,
            logger,
            parallelism,
        };

        let sets = &options.features_to_evaluate;
        if sets.is_empty() {
            let mut views: FoldViews<D> = fold_data.iter().cloned().map(Some).collect();
            self.train_folds(&ctx, TrainingKind::Baseline, 0, &mut views, callbacks, summary)?;
            return self.write_fold_logs(summary, range, &[false]);
        }

        let shared_baseline = options.mode.has_shared_baseline();
        for set_idx in 0..sets.len() {
            if set_idx > 0 && shared_baseline {
                summary.share_baseline(set_idx)?;
            } else {
                let mut views = self.project(&fold_data, TrainingKind::Baseline, set_idx, logger)?;
                self.train_folds(&ctx, TrainingKind::Baseline, set_idx, &mut views, callbacks, summary)?;
            }

            let mut views = self.project(&fold_data, TrainingKind::Testing, set_idx, logger)?;
            if has_features_to_evaluate(&fold_data, &sets[set_idx]) {
                self.train_folds(&ctx, TrainingKind::Testing, set_idx, &mut views, callbacks, summary)?;
            } else {
                logger.warn_degenerate_set(set_idx);
                let baseline_idx = if shared_baseline { 0 } else { set_idx };
                summary.copy_baseline_into_testing(set_idx, baseline_idx)?;
            }
        }
        self.write_fold_logs(summary, range, &[false, true])
    }

    /// Materialize learn/test subsets of every fold in parallel.
    ///
    /// Each of the `2 · fold_count` subsets gets an equal share of the memory
    /// budget.
    fn create_fold_data<D: DatasetView>(
        &self,
        data: &D,
        folds: &[FoldSpec],
        parallelism: Parallelism,
    ) -> Result<Vec<(D, D)>> {
        let task_budget = self.memory_budget / (2 * folds.len().max(1) as u64);
        let tasks: Vec<(usize, bool)> = (0..folds.len())
            .flat_map(|fold| [(fold, false), (fold, true)])
            .collect();
        let subsets: Vec<Result<D>> = parallelism.maybe_par_map(tasks, |(fold, is_test)| {
            let objects = if is_test { &folds[fold].test } else { &folds[fold].train };
            data.subset(objects, task_budget)
        });

        let mut subsets = subsets.into_iter();
        let mut fold_data = Vec::with_capacity(folds.len());
        while let (Some(learn), Some(test)) = (subsets.next(), subsets.next()) {
            fold_data.push((learn?, test?));
        }
        Ok(fold_data)
    }

    /// Views of every fold with the projection of `(kind, set_idx)` applied.
    fn project<D: DatasetView>(
        &self,
        fold_data: &[(D, D)],
        kind: TrainingKind,
        set_idx: usize,
        logger: &EvalLogger,
    ) -> Result<FoldViews<D>> {
        let ignored = ignored_features(self.options.mode, kind, set_idx, &self.options.features_to_evaluate);
        logger.log_projection(set_idx, kind.as_str(), &ignored);
        fold_data
            .iter()
            .map(|(learn, test)| -> Result<Option<(D, D)>> {
                Ok(Some((learn.features_subset(&ignored)?, test.features_subset(&ignored)?)))
            })
            .collect()
    }

    /// Train every fold of one `(set, kind)` group not yet in the summary.
    fn train_folds<D: DatasetView>(
        &self,
        ctx: &RangeContext<'_>,
        kind: TrainingKind,
        set_idx: usize,
        views: &mut FoldViews<D>,
        callbacks: &mut FeatureEvaluationCallbacks,
        summary: &mut FeatureEvaluationSummary,
    ) -> Result<()> {
        let is_test = kind.is_test();
        let mut pending = Vec::new();
        for fold in 0..views.len() {
            let marker = ProgressMarker::new(
                ctx.range.begin,
                set_idx as u32,
                is_test,
                ctx.range.offset + fold as u32,
            );
            if callbacks.has_result(marker)? {
                ctx.logger.log_skipped(set_idx, kind.as_str(), ctx.range.absolute_fold(fold as u32));
                continue;
            }
            let (learn, test) = views[fold]
                .take()
                .ok_or_else(|| EvalError::Internal(format!("Fold {fold} data is in use")))?;
            let seed = ctx.fold_seed(set_idx, kind, fold)?;
            let context = FoldContext::new(ctx.range.absolute_fold(fold as u32), learn, test, seed);
            pending.push((fold, marker, context));
        }

        if self.options.parallel_folds {
            let results: Vec<Result<TrainedFold<D>>> = ctx
                .parallelism
                .maybe_par_map(pending, |(fold, marker, context)| {
                    self.train_fold(kind, set_idx, fold, marker, context, ctx.parallelism)
                });
            for trained in results {
                self.commit(trained?, kind, set_idx, views, ctx.logger, callbacks, summary)?;
            }
        } else {
            for (fold, marker, context) in pending {
                let trained = self.train_fold(kind, set_idx, fold, marker, context, ctx.parallelism)?;
                self.commit(trained, kind, set_idx, views, ctx.logger, callbacks, summary)?;
            }
        }
        Ok(())
    }

    /// Train one fold, score it on its test view and compute strengths.
    fn train_fold<D: DatasetView>(
        &self,
        kind: TrainingKind,
        set_idx: usize,
        fold: usize,
        marker: ProgressMarker,
        mut context: FoldContext<D>,
        parallelism: Parallelism,
    ) -> Result<TrainedFold<D>> {
        let start = Instant::now();
        let train_dir = self.output.train_dir.as_ref().map(|dir| {
            dir.join(fold_dir_name(
                self.options.mode,
                !self.options.features_to_evaluate.is_empty(),
                kind.is_test(),
                set_idx,
                context.fold_idx,
            ))
        });
        let mut iteration_callbacks = IterationCallbacks::new(self.trainer.iteration_count(), self.verbosity);
        self.trainer.train(
            train_dir.as_deref(),
            &self.metrics,
            &mut context,
            &mut iteration_callbacks,
            parallelism,
        )?;

        if context.metrics_on_test.is_empty() {
            context.metrics_on_test = self.calc_metrics_for_test(&context, parallelism)?;
        }
        let elapsed = start.elapsed();

        let (strengths, regular_strengths) = if self.output.wants_fstr() {
            let model = context
                .model
                .as_ref()
                .ok_or_else(|| EvalError::Internal("Trainer produced no model".into()))?;
            let fstr = self.output.fstr_kind;
            let effect = fstr.feature_effect(model);
            let regular = self
                .output
                .calc_regular_fstr
                .then(|| fstr.regular_effect(&effect, context.learn.n_features()));
            (self.output.calc_fstr.then_some(effect), regular)
        } else {
            (None, None)
        };

        Ok(TrainedFold {
            fold,
            marker,
            context,
            elapsed,
            strengths,
            regular_strengths,
        })
    }

    /// Score the model tree by tree on the test view.
    fn calc_metrics_for_test<D: DatasetView>(
        &self,
        context: &FoldContext<D>,
        parallelism: Parallelism,
    ) -> Result<MetricsHistory> {
        let model = context
            .model
            .as_ref()
            .ok_or_else(|| EvalError::Internal("Trainer produced no model".into()))?;
        let n_trees = model.n_trees();
        ensure_internal!(
            n_trees == context.metrics_on_train.len(),
            "Model has {n_trees} trees but {} training iterations were recorded",
            context.metrics_on_train.len()
        );
        ensure_internal!(
            model.n_groups() == self.trainer.approx_dimension(),
            "Model has {} outputs, expected approx dimension {}",
            model.n_groups(),
            self.trainer.approx_dimension()
        );

        let test = &context.test;
        let targets = test.targets();
        let mut approx = model.init_approx(test.n_objects() as usize);
        let mut history = Vec::with_capacity(n_trees);
        for tree_idx in 0..n_trees {
            model.apply_tree(tree_idx, test, &mut approx, parallelism)?;
            history.push(
                self.metrics
                    .iter()
                    .map(|metric| metric.compute(approx.view(), targets))
                    .collect(),
            );
        }
        Ok(history)
    }

    /// Record a trained fold, checkpoint, and hand its views back.
    #[allow(clippy::too_many_arguments)]
    fn commit<D: DatasetView>(
        &self,
        trained: TrainedFold<D>,
        kind: TrainingKind,
        set_idx: usize,
        views: &mut FoldViews<D>,
        logger: &EvalLogger,
        callbacks: &mut FeatureEvaluationCallbacks,
        summary: &mut FeatureEvaluationSummary,
    ) -> Result<()> {
        let TrainedFold {
            fold,
            marker,
            mut context,
            elapsed,
            strengths,
            regular_strengths,
        } = trained;
        let is_test = kind.is_test();

        summary.push_fold(is_test, set_idx, std::mem::take(&mut context.metrics_on_test))?;
        logger.log_fold_built(context.fold_idx, elapsed);
        summary.push_feature_strengths(is_test, set_idx, strengths, regular_strengths)?;
        callbacks.on_fold_completed(summary, marker)?;
        if let Some(path) = callbacks.snapshot_path() {
            logger.log_snapshot_saved(path);
        }

        views[fold] = Some(context.into_views());
        Ok(())
    }

    fn write_fold_logs(
        &self,
        summary: &FeatureEvaluationSummary,
        range: &FoldRange,
        kinds: &[bool],
    ) -> Result<()> {
        let Some(train_dir) = self.output.train_dir.as_deref() else {
            return Ok(());
        };
        for &is_test in kinds {
            summary.write_fold_logs(
                train_dir,
                self.options.mode,
                is_test,
                range.absolute_fold(0),
                range.fold_count,
                self.options.offset,
            )?;
        }
        Ok(())
    }
}

/// Per-range state shared by every training of the range.
struct RangeContext<'a> {
    range: &'a FoldRange,
    /// `[set][kind][fold]`, flattened.
    fold_seeds: &'a [u64],
    logger: &'a EvalLogger,
    parallelism: Parallelism,
}

impl RangeContext<'_> {
    /// Trainer seed of one `(set, kind, fold)`; independent of which
    /// trainings a resumed run skips.
    fn fold_seed(&self, set_idx: usize, kind: TrainingKind, fold: usize) -> Result<u64> {
        let fold_count = self.range.fold_count as usize;
        let idx = (set_idx * 2 + usize::from(kind.is_test())) * fold_count + fold;
        self.fold_seeds.get(idx).copied().ok_or_else(|| {
            EvalError::Internal(format!(
                "No trainer seed for set {set_idx}, {} fold {fold}",
                kind.as_str()
            ))
        })
    }
}

/// Whether some feature of `set` is usable in the learn view of some fold.
fn has_features_to_evaluate<D: DatasetView>(fold_data: &[(D, D)], set: &[u32]) -> bool {
    fold_data
        .iter()
        .any(|(learn, _)| set.iter().any(|&feature| learn.is_feature_available(feature)))
}

/// Run a feature evaluation with default execution settings.
pub fn evaluate_features<D: DatasetView, T: Trainer>(
    dataset: &D,
    trainer: T,
    metrics: Vec<Metric>,
    options: FeatureEvalOptions,
    output: OutputOptions,
) -> Result<FeatureEvaluationSummary> {
    FeatureEvaluator::new(trainer, metrics, options)
        .with_output(output)
        .evaluate(dataset)
}

//! End-to-end evaluation scenarios.

use approx::assert_relative_eq;
use boosters_eval::eval::{FeatureEvalMode, FeatureEvalOptions, FeatureEvaluator, Verbosity};
use boosters_eval::folds::CvParams;
use boosters_eval::EvalError;
use rstest::rstest;

use crate::common::{
    capture_logs, grouped_dataset, metrics, regression_dataset, stump_trainer, CONSTANT, NOISE, STRONG, WEAK,
};

const N_ITERATIONS: u32 = 10;

#[test]
fn one_set_one_vs_others_five_folds_two_metrics() {
    let options = FeatureEvalOptions::builder()
        .features_to_evaluate(vec![vec![STRONG]])
        .mode(FeatureEvalMode::OneVsOthers)
        .fold_size(40)
        .fold_count(5)
        .seed(3)
        .build()
        .unwrap();
    let summary = FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), options)
        .with_n_threads(2)
        .evaluate(&regression_dataset(240, 1))
        .unwrap();

    for is_test in [false, true] {
        let best = summary.best_metrics(is_test, 0);
        assert_eq!(best.len(), 2);
        assert!(best.iter().all(|per_fold| per_fold.len() == 5));
        assert_eq!(summary.metrics_history(is_test, 0).len(), 5);
    }
    let iterations = summary.best_baseline_iterations(0);
    assert_eq!(iterations.len(), 5);
    assert!(iterations.iter().all(|&it| it < N_ITERATIONS));

    // Hiding the strong feature hurts every fold: the signed-rank test is at
    // its exact minimum for five folds and both deltas favour the tested model.
    assert_relative_eq!(summary.wx_test()[0], 0.0625, epsilon = 1e-12);
    assert!(summary.average_metric_delta(0).iter().all(|&delta| delta > 0.0));

    let report = summary.to_string();
    let lines: Vec<&str> = report.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "p-value\tbest iteration in each fold\tRMSE\tMAE\tfeature set");
    let columns: Vec<&str> = lines[1].split('\t').collect();
    assert_eq!(columns.len(), 5);
    assert_eq!(columns[1].split(',').count(), 5);
    assert_eq!(columns[4], "0");
}

#[rstest]
#[case(FeatureEvalMode::OneVsNone)]
#[case(FeatureEvalMode::OneVsOthers)]
#[case(FeatureEvalMode::OneVsAll)]
#[case(FeatureEvalMode::OthersVsAll)]
fn every_mode_fills_every_slot(#[case] mode: FeatureEvalMode) {
    let options = FeatureEvalOptions::builder()
        .features_to_evaluate(vec![vec![STRONG], vec![WEAK, NOISE]])
        .mode(mode)
        .fold_size(30)
        .fold_count(3)
        .build()
        .unwrap();
    let summary = FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), options)
        .with_n_threads(1)
        .evaluate(&regression_dataset(150, 2))
        .unwrap();

    for set_idx in 0..2 {
        assert_eq!(summary.best_baseline_iterations(set_idx).len(), 3);
        assert_eq!(summary.best_metrics(false, set_idx)[0].len(), 3);
        assert_eq!(summary.best_metrics(true, set_idx)[0].len(), 3);
        assert_eq!(summary.metrics_history(true, set_idx).len(), 3);
    }
    if mode.has_shared_baseline() {
        assert_eq!(summary.best_metrics(false, 1), summary.best_metrics(false, 0));
        assert_eq!(summary.best_baseline_iterations(1), summary.best_baseline_iterations(0));
    }
    assert!(summary.wx_test().iter().all(|p| (0.0..=1.0).contains(p)));
}

#[test]
fn baseline_only_run_compares_baseline_with_itself() {
    let options = FeatureEvalOptions::builder().fold_size(25).fold_count(4).build().unwrap();
    let summary = FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), options)
        .evaluate(&regression_dataset(100, 3))
        .unwrap();

    assert_eq!(summary.feature_set_count(), 1);
    assert!(!summary.has_testing_results());
    assert_eq!(summary.wx_test(), [1.0]);
    assert_eq!(summary.average_metric_delta(0), [0.0, 0.0]);
    let report = summary.to_string();
    assert!(report.lines().nth(1).unwrap().ends_with("\t0\t0\t"));
}

#[rstest]
#[case::constant(regression_dataset(120, 4), CONSTANT)]
#[case::ignored(regression_dataset(120, 4).with_ignored_features(&[NOISE]).unwrap(), NOISE)]
fn degenerate_feature_set_warns_and_reuses_baseline(
    #[case] dataset: boosters_eval::data::Dataset,
    #[case] feature: u32,
) {
    let options = FeatureEvalOptions::builder()
        .features_to_evaluate(vec![vec![STRONG], vec![feature]])
        .mode(FeatureEvalMode::OneVsOthers)
        .fold_size(30)
        .fold_count(3)
        .build()
        .unwrap();
    let evaluator = FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), options).with_n_threads(1);
    let (summary, logs) = capture_logs(|| evaluator.evaluate(&dataset));
    let summary = summary.unwrap();

    assert!(logs.contains("Feature set 1 consists of ignored or constant features"));
    assert!(!logs.contains("Feature set 0 consists of"));
    assert_eq!(summary.best_metrics(true, 1), summary.best_metrics(false, 1));
    assert_eq!(summary.metrics_history(true, 1), summary.metrics_history(false, 1));
    assert_eq!(summary.wx_test()[1], 1.0);
    assert_eq!(summary.average_metric_delta(1), [0.0, 0.0]);
}

#[test]
fn info_verbosity_logs_projections_and_timings() {
    let options = FeatureEvalOptions::builder()
        .features_to_evaluate(vec![vec![STRONG, WEAK]])
        .mode(FeatureEvalMode::OneVsOthers)
        .fold_size(30)
        .fold_count(2)
        .build()
        .unwrap();
    let evaluator = FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), options)
        .with_n_threads(1)
        .with_verbosity(Verbosity::Info);
    let (summary, logs) = capture_logs(|| evaluator.evaluate(&regression_dataset(90, 5)));
    summary.unwrap();

    assert!(logs.contains("Feature set 0, baseline, additional ignored features 0:1"));
    assert!(logs.contains("Feature set 0, testing, no additional ignored features"));
    assert!(logs.contains("Fold 0: model built in"));
    assert!(logs.contains("Fold 1: model built in"));
}

#[test]
fn silent_verbosity_logs_no_progress() {
    let options = FeatureEvalOptions::builder().fold_size(30).fold_count(2).build().unwrap();
    let evaluator = FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), options).with_n_threads(1);
    let (summary, logs) = capture_logs(|| evaluator.evaluate(&regression_dataset(90, 5)));
    summary.unwrap();
    assert!(!logs.contains("model built"));
}

#[test]
fn parallel_folds_match_sequential_training() {
    let builder = FeatureEvalOptions::builder()
        .features_to_evaluate(vec![vec![STRONG], vec![WEAK]])
        .mode(FeatureEvalMode::OneVsOthers)
        .fold_size(30)
        .fold_count(4)
        .seed(11);
    let sequential = builder.clone().build().unwrap();
    let parallel = builder.parallel_folds(true).build().unwrap();
    let dataset = regression_dataset(150, 6);

    let expected = FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), sequential)
        .with_n_threads(1)
        .evaluate(&dataset)
        .unwrap();
    let actual = FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), parallel)
        .with_n_threads(4)
        .evaluate(&dataset)
        .unwrap();
    assert_eq!(actual, expected);
}

#[test]
fn thread_count_does_not_change_results() {
    let options = FeatureEvalOptions::builder()
        .features_to_evaluate(vec![vec![WEAK]])
        .fold_size(30)
        .fold_count(3)
        .build()
        .unwrap();
    let dataset = regression_dataset(120, 7);
    let run = |n_threads| {
        FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), options.clone())
            .with_n_threads(n_threads)
            .evaluate(&dataset)
            .unwrap()
    };
    assert_eq!(run(1), run(3));
}

#[test]
fn inverted_cross_validation_over_groups() {
    let options = FeatureEvalOptions::builder()
        .features_to_evaluate(vec![vec![STRONG]])
        .cv(CvParams::inverted(4))
        .shuffle(false)
        .build()
        .unwrap();
    let summary = FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), options)
        .with_n_threads(1)
        .evaluate(&grouped_dataset(20, 5, false, 8))
        .unwrap();
    assert_eq!(summary.best_baseline_iterations(0).len(), 4);
    assert_eq!(summary.best_metrics(true, 0)[1].len(), 4);
}

#[test]
fn ordered_dataset_is_rejected() {
    let options = FeatureEvalOptions::builder().fold_size(10).fold_count(2).build().unwrap();
    let err = FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), options)
        .evaluate(&regression_dataset(60, 9).with_ordered(true))
        .unwrap_err();
    assert!(matches!(err, EvalError::Config(msg) if msg.contains("ordered objects data is not yet implemented")));
}

#[test]
fn unshuffled_geometry_error_names_largest_fold_size() {
    let options = FeatureEvalOptions::builder()
        .fold_size(30)
        .fold_count(5)
        .shuffle(false)
        .build()
        .unwrap();
    let err = FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), options)
        .evaluate(&regression_dataset(100, 10))
        .unwrap_err();
    assert!(matches!(err, EvalError::Config(msg) if msg.contains("decrease fold size to at most 20")));
}

#[test]
fn whole_groups_that_cannot_fill_the_folds_are_a_resource_error() {
    // Twelve objects fit three folds of four, but groups of three only form two.
    let options = FeatureEvalOptions::builder()
        .fold_size(4)
        .fold_count(3)
        .shuffle(false)
        .build()
        .unwrap();
    let err = FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), options)
        .with_n_threads(1)
        .evaluate(&grouped_dataset(4, 3, false, 13))
        .unwrap_err();
    assert!(matches!(err, EvalError::Resource(msg) if msg.contains("decrease fold size to at most 3")));
}

#[test]
fn shuffling_allows_more_folds_than_fit_disjointly() {
    let options = FeatureEvalOptions::builder()
        .features_to_evaluate(vec![vec![STRONG]])
        .fold_size(30)
        .fold_count(5)
        .build()
        .unwrap();
    let summary = FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), options)
        .with_n_threads(1)
        .evaluate(&regression_dataset(100, 10))
        .unwrap();
    assert_eq!(summary.best_baseline_iterations(0).len(), 5);
}

#[test]
fn pool_smaller_than_fold_count_is_rejected() {
    let options = FeatureEvalOptions::builder().fold_size(2).fold_count(5).build().unwrap();
    let err = FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), options)
        .evaluate(&regression_dataset(4, 11))
        .unwrap_err();
    assert!(matches!(err, EvalError::Config(msg) if msg.contains("Pool is too small")));
}

#[test]
fn out_of_range_feature_set_is_rejected() {
    let options = FeatureEvalOptions::builder()
        .features_to_evaluate(vec![vec![42]])
        .fold_size(10)
        .fold_count(2)
        .build()
        .unwrap();
    let err = FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), options)
        .evaluate(&regression_dataset(60, 12))
        .unwrap_err();
    assert!(matches!(err, EvalError::Config(_)));
}

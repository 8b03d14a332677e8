//! Checkpoint and resume: an interrupted run restarted from its snapshot must
//! produce the same summary as an uninterrupted run.

use std::fs;

use boosters_eval::eval::{
    load_snapshot, FeatureEvalMode, FeatureEvalOptions, FeatureEvaluationSummary, FeatureEvaluator, OutputOptions,
};
use boosters_eval::EvalError;
use rstest::rstest;

use crate::common::{metrics, regression_dataset, stump_trainer, CountingTrainer, STRONG, WEAK};

const N_ITERATIONS: u32 = 6;

/// Two unshared baselines and two testing groups of three folds.
fn one_vs_others() -> FeatureEvalOptions {
    FeatureEvalOptions::builder()
        .features_to_evaluate(vec![vec![STRONG], vec![WEAK]])
        .mode(FeatureEvalMode::OneVsOthers)
        .fold_size(20)
        .fold_count(3)
        .seed(5)
        .build()
        .unwrap()
}

/// Shared baseline over two fold ranges: offset 3 of 5 disjoint folds leaves
/// two folds for the first range and two for the next.
fn one_vs_none_two_ranges() -> FeatureEvalOptions {
    FeatureEvalOptions::builder()
        .features_to_evaluate(vec![vec![STRONG], vec![WEAK]])
        .mode(FeatureEvalMode::OneVsNone)
        .fold_size(20)
        .offset(3)
        .fold_count(4)
        .seed(9)
        .build()
        .unwrap()
}

fn uninterrupted(options: &FeatureEvalOptions) -> FeatureEvaluationSummary {
    FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), options.clone())
        .with_n_threads(1)
        .evaluate(&regression_dataset(100, 21))
        .unwrap()
}

#[rstest]
#[case::first_training(one_vs_others(), 1, 12)]
#[case::inside_baseline(one_vs_others(), 2, 12)]
#[case::first_testing(one_vs_others(), 4, 12)]
#[case::second_set(one_vs_others(), 8, 12)]
#[case::last_training(one_vs_others(), 12, 12)]
#[case::shared_first_range(one_vs_none_two_ranges(), 5, 12)]
#[case::shared_second_range(one_vs_none_two_ranges(), 9, 12)]
fn resume_matches_uninterrupted_run(
    #[case] options: FeatureEvalOptions,
    #[case] fail_at: u32,
    #[case] total_trainings: u32,
) {
    let dir = tempfile::tempdir().unwrap();
    let output = OutputOptions {
        snapshot_path: Some(dir.path().join("eval.snapshot")),
        ..Default::default()
    };
    let dataset = regression_dataset(100, 21);

    let interrupted = FeatureEvaluator::new(
        CountingTrainer::failing_at(stump_trainer(N_ITERATIONS), fail_at),
        metrics(),
        options.clone(),
    )
    .with_output(output.clone())
    .with_n_threads(1);
    let err = interrupted.evaluate(&dataset).unwrap_err();
    assert!(matches!(err, EvalError::Internal(msg) if msg.contains("interrupted")));

    let resumed = FeatureEvaluator::new(CountingTrainer::new(stump_trainer(N_ITERATIONS)), metrics(), options.clone())
        .with_output(output)
        .with_n_threads(1);
    let summary = resumed.evaluate(&dataset).unwrap();

    assert_eq!(resumed.trainer().calls(), total_trainings - (fail_at - 1));
    assert_eq!(summary, uninterrupted(&options));
}

/// Concurrent folds are committed in fold order, so an interruption keeps
/// exactly the folds before the failed one.
#[rstest]
#[case::first_fold(0, 1, 12)]
#[case::last_fold_of_first_group(2, 1, 12 - 2)]
#[case::second_set_baseline(1, 3, 12 - 7)]
fn resume_after_parallel_folds_matches_sequential_run(
    #[case] fold_idx: u32,
    #[case] nth: u32,
    #[case] retrained: u32,
) {
    let dir = tempfile::tempdir().unwrap();
    let output = OutputOptions {
        snapshot_path: Some(dir.path().join("eval.snapshot")),
        ..Default::default()
    };
    let mut options = one_vs_others();
    options.parallel_folds = true;
    let dataset = regression_dataset(100, 21);

    let err = FeatureEvaluator::new(
        CountingTrainer::failing_on_fold(stump_trainer(N_ITERATIONS), fold_idx, nth),
        metrics(),
        options.clone(),
    )
    .with_output(output.clone())
    .with_n_threads(4)
    .evaluate(&dataset)
    .unwrap_err();
    assert!(matches!(err, EvalError::Internal(msg) if msg.contains("interrupted")));

    let resumed = FeatureEvaluator::new(CountingTrainer::new(stump_trainer(N_ITERATIONS)), metrics(), options)
        .with_output(output)
        .with_n_threads(4);
    let summary = resumed.evaluate(&dataset).unwrap();

    assert_eq!(resumed.trainer().calls(), retrained);
    assert_eq!(summary, uninterrupted(&one_vs_others()));
}

#[test]
fn completed_snapshot_trains_nothing_again() {
    let dir = tempfile::tempdir().unwrap();
    let output = OutputOptions {
        snapshot_path: Some(dir.path().join("eval.snapshot")),
        ..Default::default()
    };
    let options = one_vs_others();
    let dataset = regression_dataset(100, 21);

    let first = FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), options.clone())
        .with_output(output.clone())
        .evaluate(&dataset)
        .unwrap();

    let rerun = FeatureEvaluator::new(CountingTrainer::new(stump_trainer(N_ITERATIONS)), metrics(), options)
        .with_output(output);
    assert_eq!(rerun.evaluate(&dataset).unwrap(), first);
    assert_eq!(rerun.trainer().calls(), 0);
}

#[test]
fn snapshot_holds_last_completed_fold() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eval.snapshot");
    let output = OutputOptions {
        snapshot_path: Some(path.clone()),
        ..Default::default()
    };
    let options = one_vs_others();

    FeatureEvaluator::new(CountingTrainer::failing_at(stump_trainer(N_ITERATIONS), 5), metrics(), options.clone())
        .with_output(output)
        .with_n_threads(1)
        .evaluate(&regression_dataset(100, 21))
        .unwrap_err();

    // Baseline folds 0..3 and testing fold 0 of set 0 completed.
    let snapshot = load_snapshot(&path).unwrap();
    let marker = snapshot.marker.unwrap();
    assert_eq!(
        (marker.fold_range_begin, marker.feature_set_idx, marker.is_test, marker.fold_idx),
        (0, 0, true, 0)
    );
    assert_eq!(snapshot.options, options);
    assert_eq!(snapshot.summary.metrics_history(false, 0).len(), 3);
    assert_eq!(snapshot.summary.metrics_history(true, 0).len(), 1);

    // Atomic replacement leaves no temporary files behind.
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn changed_options_are_rejected_on_resume() {
    let dir = tempfile::tempdir().unwrap();
    let output = OutputOptions {
        snapshot_path: Some(dir.path().join("eval.snapshot")),
        ..Default::default()
    };
    let dataset = regression_dataset(100, 21);

    FeatureEvaluator::new(CountingTrainer::failing_at(stump_trainer(N_ITERATIONS), 3), metrics(), one_vs_others())
        .with_output(output.clone())
        .evaluate(&dataset)
        .unwrap_err();

    let mut changed = one_vs_others();
    changed.fold_count = 4;
    let err = FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), changed)
        .with_output(output)
        .evaluate(&dataset)
        .unwrap_err();
    assert!(matches!(err, EvalError::Config(msg) if msg.contains("differ from options in snapshot")));
}

#[test]
fn corrupted_snapshot_is_a_snapshot_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eval.snapshot");
    let output = OutputOptions {
        snapshot_path: Some(path.clone()),
        ..Default::default()
    };
    let dataset = regression_dataset(100, 21);

    FeatureEvaluator::new(CountingTrainer::failing_at(stump_trainer(N_ITERATIONS), 3), metrics(), one_vs_others())
        .with_output(output.clone())
        .evaluate(&dataset)
        .unwrap_err();

    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&path, bytes).unwrap();

    let err = FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), one_vs_others())
        .with_output(output)
        .evaluate(&dataset)
        .unwrap_err();
    assert!(matches!(err, EvalError::Snapshot(_)));
}

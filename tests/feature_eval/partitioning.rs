//! Partitioning invariants checked through the public folds API, plus
//! time-split evaluation end to end.

use std::collections::HashSet;

use boosters_eval::data::{DatasetView, ObjectsGrouping, SamplingUnit};
use boosters_eval::eval::{FeatureEvalOptions, FeatureEvaluator};
use boosters_eval::folds::{find_quantile_timestamp, make_folds, Partitioning};
use boosters_eval::EvalError;
use proptest::prelude::*;

use crate::common::{grouped_dataset, metrics, regression_dataset, stump_trainer, STRONG};

/// `n_groups` groups of varying size; group `g` has timestamp `g / 2`.
fn timed_groups(n_groups: u32) -> (ObjectsGrouping, Vec<u64>) {
    let sizes: Vec<u32> = (0..n_groups).map(|g| 1 + g % 3).collect();
    let grouping = ObjectsGrouping::from_sizes(&sizes).unwrap();
    let timestamps = sizes
        .iter()
        .enumerate()
        .flat_map(|(g, &size)| std::iter::repeat((g / 2) as u64).take(size as usize))
        .collect();
    (grouping, timestamps)
}

#[test]
fn time_split_trains_before_and_tests_after_quantile() {
    let (grouping, timestamps) = timed_groups(40);
    let quantile = 0.75;
    let partitioning = Partitioning::TimeSplit {
        unit: SamplingUnit::Group,
        fold_size: 5,
        offset: 1,
        fold_count: 3,
        quantile,
    };
    let folds = make_folds(&grouping, Some(&timestamps), &partitioning).unwrap();
    let cutoff = find_quantile_timestamp(&grouping, &timestamps, quantile).unwrap();

    assert_eq!(folds.len(), 3);
    let shared_test = &folds[0].test;
    assert!(!shared_test.is_empty());

    let mut seen_train = HashSet::new();
    for fold in &folds {
        assert_eq!(&fold.test, shared_test);
        assert!(fold.train.iter().all(|&o| timestamps[o as usize] <= cutoff));
        assert!(fold.test.iter().all(|&o| timestamps[o as usize] > cutoff));
        // Training blocks are disjoint and hold whole groups.
        assert!(fold.train.iter().all(|&o| seen_train.insert(o)));
        let groups: HashSet<u32> = fold.train.iter().map(|&o| grouping.group_of(o)).collect();
        assert_eq!(groups.len(), 5);
        let objects: usize = groups.iter().map(|&g| grouping.group(g).len() as usize).sum();
        assert_eq!(objects, fold.train.len());
    }
}

#[test]
fn time_split_evaluation_runs_on_timestamped_groups() {
    let options = FeatureEvalOptions::builder()
        .features_to_evaluate(vec![vec![STRONG]])
        .fold_size_unit(SamplingUnit::Group)
        .fold_size(8)
        .fold_count(3)
        .time_split_quantile(0.8)
        .shuffle(false)
        .build()
        .unwrap();
    let summary = FeatureEvaluator::new(stump_trainer(6), metrics(), options)
        .with_n_threads(1)
        .evaluate(&grouped_dataset(50, 4, true, 31))
        .unwrap();
    assert_eq!(summary.best_baseline_iterations(0).len(), 3);
    assert_eq!(summary.best_metrics(true, 0)[0].len(), 3);
}

#[test]
fn time_split_requires_groups() {
    let dataset = regression_dataset(100, 32).with_timestamps((0..100).collect()).unwrap();
    let options = FeatureEvalOptions::builder().fold_size(10).fold_count(2).build().unwrap();
    let err = FeatureEvaluator::new(stump_trainer(6), metrics(), options)
        .evaluate(&dataset)
        .unwrap_err();
    assert!(matches!(err, EvalError::Config(msg) if msg.contains("requires dataset with groups")));
}

#[test]
fn group_folds_keep_groups_whole() {
    let dataset = grouped_dataset(30, 3, false, 33);
    let partitioning = Partitioning::FixedSize {
        unit: SamplingUnit::Object,
        fold_size: 10,
        offset: 0,
        fold_count: 3,
    };
    let folds = make_folds(dataset.grouping(), None, &partitioning).unwrap();
    for fold in &folds {
        // Ten objects round up to whole groups of three.
        assert_eq!(fold.test.len(), 12);
        let groups: HashSet<u32> = fold.test.iter().map(|&o| dataset.grouping().group_of(o)).collect();
        assert!(fold.train.iter().all(|&o| !groups.contains(&dataset.grouping().group_of(o))));
    }
}

proptest! {
    #[test]
    fn fixed_size_folds_partition_objects(
        n_objects in 20u32..200,
        fold_size in 1u32..20,
        offset in 0u32..3,
    ) {
        let grouping = ObjectsGrouping::trivial(n_objects);
        let disjoint = n_objects / fold_size;
        prop_assume!(disjoint > offset);
        let fold_count = disjoint - offset;
        let partitioning = Partitioning::FixedSize {
            unit: SamplingUnit::Object,
            fold_size,
            offset,
            fold_count,
        };
        let folds = make_folds(&grouping, None, &partitioning).unwrap();
        prop_assert_eq!(folds.len() as u32, fold_count);

        let mut seen_test = HashSet::new();
        for fold in &folds {
            prop_assert_eq!(fold.test.len() as u32, fold_size);
            prop_assert!(fold.test.iter().all(|&o| seen_test.insert(o)));
            prop_assert_eq!(fold.train.len() + fold.test.len(), n_objects as usize);
            let test: HashSet<u32> = fold.test.iter().copied().collect();
            prop_assert!(fold.train.iter().all(|o| !test.contains(o)));
        }
    }

    #[test]
    fn offset_selects_later_blocks(n_objects in 30u32..120, fold_size in 2u32..10) {
        let grouping = ObjectsGrouping::trivial(n_objects);
        let disjoint = n_objects / fold_size;
        let all = make_folds(&grouping, None, &Partitioning::FixedSize {
            unit: SamplingUnit::Object,
            fold_size,
            offset: 0,
            fold_count: disjoint,
        }).unwrap();
        let shifted = make_folds(&grouping, None, &Partitioning::FixedSize {
            unit: SamplingUnit::Object,
            fold_size,
            offset: 2,
            fold_count: disjoint - 2,
        }).unwrap();
        prop_assert_eq!(&all[2..], &shifted[..]);
    }
}

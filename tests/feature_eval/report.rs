//! Output files: per-fold logs under the train directory and the TSV report.

use std::fs;
use std::path::Path;

use boosters_eval::booster::FstrKind;
use boosters_eval::eval::{FeatureEvalMode, FeatureEvalOptions, FeatureEvaluator, OutputOptions};

use crate::common::{metrics, regression_dataset, stump_trainer, N_FEATURES, STRONG, WEAK};

const N_ITERATIONS: u32 = 5;

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {e}", path.display()))
        .lines()
        .map(str::to_owned)
        .collect()
}

#[test]
fn fold_logs_use_absolute_fold_indices() {
    let dir = tempfile::tempdir().unwrap();
    let options = FeatureEvalOptions::builder()
        .features_to_evaluate(vec![vec![STRONG]])
        .mode(FeatureEvalMode::OneVsOthers)
        .fold_size(20)
        .offset(1)
        .fold_count(2)
        .build()
        .unwrap();
    let output = OutputOptions {
        train_dir: Some(dir.path().to_path_buf()),
        calc_fstr: true,
        calc_regular_fstr: true,
        fstr_kind: FstrKind::SplitCount,
        ..Default::default()
    };
    FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), options)
        .with_output(output)
        .with_n_threads(1)
        .evaluate(&regression_dataset(100, 41))
        .unwrap();

    for name in [
        "Baseline_set_0_fold_1",
        "Baseline_set_0_fold_2",
        "Testing_set_0_fold_1",
        "Testing_set_0_fold_2",
    ] {
        let fold_dir = dir.path().join(name);
        let history = read_lines(&fold_dir.join("test_error.tsv"));
        assert_eq!(history[0], "iter\tRMSE\tMAE");
        assert_eq!(history.len(), N_ITERATIONS as usize + 1);
        assert!(history[1].starts_with("0\t"));

        let fstr = read_lines(&fold_dir.join("fstr.tsv"));
        assert!(!fstr.is_empty());
        let regular = read_lines(&fold_dir.join("regular_fstr.tsv"));
        assert_eq!(regular.len(), N_FEATURES);
    }
    assert!(!dir.path().join("Baseline_set_0_fold_0").exists());

    // The baseline never sees the tested feature.
    let baseline_fstr = read_lines(&dir.path().join("Baseline_set_0_fold_1").join("fstr.tsv"));
    assert!(baseline_fstr.iter().all(|line| !line.ends_with(&format!("\t{STRONG}"))));
}

#[test]
fn shared_baseline_logs_are_written_once_per_fold() {
    let dir = tempfile::tempdir().unwrap();
    let options = FeatureEvalOptions::builder()
        .features_to_evaluate(vec![vec![STRONG], vec![WEAK]])
        .mode(FeatureEvalMode::OneVsNone)
        .fold_size(25)
        .fold_count(2)
        .build()
        .unwrap();
    let output = OutputOptions {
        train_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), options)
        .with_output(output)
        .with_n_threads(1)
        .evaluate(&regression_dataset(100, 42))
        .unwrap();

    let mut names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(
        names,
        [
            "Baseline_fold_0",
            "Baseline_fold_1",
            "Testing_set_0_fold_0",
            "Testing_set_0_fold_1",
            "Testing_set_1_fold_0",
            "Testing_set_1_fold_1",
        ]
    );
    assert!(!dir.path().join("Baseline_fold_0").join("fstr.tsv").exists());
}

#[test]
fn report_rows_follow_feature_sets() {
    let options = FeatureEvalOptions::builder()
        .features_to_evaluate(vec![vec![STRONG, WEAK], vec![WEAK]])
        .mode(FeatureEvalMode::OneVsOthers)
        .fold_size(25)
        .fold_count(3)
        .build()
        .unwrap();
    let summary = FeatureEvaluator::new(stump_trainer(N_ITERATIONS), metrics(), options)
        .with_n_threads(1)
        .evaluate(&regression_dataset(100, 43))
        .unwrap();

    let report = summary.to_string();
    let rows: Vec<Vec<&str>> = report.lines().skip(1).map(|line| line.split('\t').collect()).collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][4], "0,1");
    assert_eq!(rows[1][4], "1");
    for (set_idx, row) in rows.iter().enumerate() {
        let p_value: f64 = row[0].parse().unwrap();
        assert_eq!(p_value, summary.wx_test()[set_idx]);
        let iterations: Vec<u32> = row[1].split(',').map(|it| it.parse().unwrap()).collect();
        assert_eq!(iterations, summary.best_baseline_iterations(set_idx));
        let deltas: Vec<f64> = row[2..4].iter().map(|d| d.parse().unwrap()).collect();
        assert_eq!(deltas, summary.average_metric_delta(set_idx));
    }
}

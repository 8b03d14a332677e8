//! Feature-set projection: which features a fold's model must not see.

use super::fold::TrainingKind;
use super::options::FeatureEvalMode;

/// Features to hide, on top of the dataset's own ignored features, when
/// training `kind` for feature set `set_idx`.
///
/// The result is sorted and deduplicated.
pub fn ignored_features(
    mode: FeatureEvalMode,
    kind: TrainingKind,
    set_idx: usize,
    sets: &[Vec<u32>],
) -> Vec<u32> {
    let tested = || sets.get(set_idx).cloned().unwrap_or_default();
    let mut ignored = match (mode, kind) {
        (FeatureEvalMode::OneVsAll, _) => Vec::new(),
        (FeatureEvalMode::OneVsNone, TrainingKind::Baseline) => sets.concat(),
        (FeatureEvalMode::OneVsNone, TrainingKind::Testing) => Vec::new(),
        (FeatureEvalMode::OneVsOthers, TrainingKind::Baseline) => tested(),
        (FeatureEvalMode::OneVsOthers, TrainingKind::Testing) => Vec::new(),
        (FeatureEvalMode::OthersVsAll, TrainingKind::Baseline) => Vec::new(),
        (FeatureEvalMode::OthersVsAll, TrainingKind::Testing) => tested(),
    };
    ignored.sort_unstable();
    ignored.dedup();
    ignored
}

//! Feature strength (importance) of a trained forest.
//!
//! Two flavours are produced per fold:
//! - internal: raw per-feature effect, features the model never used are
//!   omitted
//! - regular: one entry per dataset feature, normalized so the strengths sum
//!   to 100

use serde::{Deserialize, Serialize};

use super::forest::{Forest, Tree};

/// Feature strength provider.
///
/// Results are `(strength, feature_idx)` pairs sorted by strength, strongest
/// first; ties keep ascending feature order.
pub trait FeatureStrength: Send + Sync {
    /// Raw per-feature effect of `model`.
    fn feature_effect(&self, model: &Forest) -> Vec<(f64, u32)>;

    /// Effect expanded to all `n_features` and normalized to sum to 100.
    fn regular_effect(&self, effect: &[(f64, u32)], n_features: u32) -> Vec<(f64, u32)> {
        let mut strengths = vec![0.0f64; n_features as usize];
        for &(value, feature) in effect {
            if let Some(slot) = strengths.get_mut(feature as usize) {
                *slot += value;
            }
        }
        let total: f64 = strengths.iter().sum();
        if total > 0.0 {
            strengths.iter_mut().for_each(|s| *s = *s * 100.0 / total);
        }
        sorted_pairs(strengths)
    }
}

/// Built-in feature strength kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FstrKind {
    /// Total split gain per feature.
    #[default]
    Gain,
    /// Number of splits per feature.
    SplitCount,
}

impl FeatureStrength for FstrKind {
    fn feature_effect(&self, model: &Forest) -> Vec<(f64, u32)> {
        let mut per_feature: Vec<f64> = Vec::new();
        for tree in model.trees() {
            if let Tree::Stump { feature, gain, .. } = *tree {
                let idx = feature as usize;
                if per_feature.len() <= idx {
                    per_feature.resize(idx + 1, 0.0);
                }
                per_feature[idx] += match self {
                    FstrKind::Gain => gain,
                    FstrKind::SplitCount => 1.0,
                };
            }
        }
        sorted_pairs(per_feature)
            .into_iter()
            .filter(|&(value, _)| value > 0.0)
            .collect()
    }
}

fn sorted_pairs(strengths: Vec<f64>) -> Vec<(f64, u32)> {
    let mut pairs: Vec<(f64, u32)> = strengths
        .into_iter()
        .enumerate()
        .map(|(f, s)| (s, f as u32))
        .collect();
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    pairs
}

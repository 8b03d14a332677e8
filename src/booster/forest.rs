//! Forest of depth-1 trees with per-tree incremental application.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::data::DatasetView;
use crate::error::{EvalError, Result};
use crate::utils::Parallelism;

/// Objects per parallel work item when applying a tree.
const APPLY_CHUNK: usize = 4096;

/// One boosted tree: either a constant or a single threshold split.
///
/// Values at or below `threshold` (and NaN) go left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Tree {
    Leaf {
        value: f32,
    },
    Stump {
        feature: u32,
        threshold: f32,
        left: f32,
        right: f32,
        /// Loss reduction achieved by the split.
        gain: f64,
    },
}

impl Tree {
    #[inline]
    pub fn predict(&self, value: f32) -> f32 {
        match *self {
            Tree::Leaf { value: leaf } => leaf,
            Tree::Stump {
                threshold,
                left,
                right,
                ..
            } => {
                if value.is_nan() || value <= threshold {
                    left
                } else {
                    right
                }
            }
        }
    }

    /// Split feature, if any.
    #[inline]
    pub fn split_feature(&self) -> Option<u32> {
        match *self {
            Tree::Leaf { .. } => None,
            Tree::Stump { feature, .. } => Some(feature),
        }
    }
}

/// Structural validation errors for [`Forest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForestValidationError {
    BaseScoreLenMismatch { n_groups: u32, len: usize },
    TreeGroupOutOfRange { tree_idx: usize, group: u32, n_groups: u32 },
}

/// Additive ensemble of [`Tree`]s with a per-group base score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forest {
    trees: Vec<Tree>,
    tree_groups: Vec<u32>,
    n_groups: u32,
    base_score: Vec<f32>,
}

impl Forest {
    /// Create an empty forest with `n_groups` outputs.
    pub fn new(n_groups: u32) -> Self {
        Self {
            trees: Vec::new(),
            tree_groups: Vec::new(),
            n_groups,
            base_score: vec![0.0; n_groups as usize],
        }
    }

    pub fn with_base_score(mut self, base_score: Vec<f32>) -> Self {
        debug_assert_eq!(base_score.len(), self.n_groups as usize);
        self.base_score = base_score;
        self
    }

    pub fn push_tree(&mut self, tree: Tree, group: u32) {
        debug_assert!(group < self.n_groups, "group out of range");
        self.trees.push(tree);
        self.tree_groups.push(group);
    }

    #[inline]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    #[inline]
    pub fn n_groups(&self) -> u32 {
        self.n_groups
    }

    #[inline]
    pub fn base_score(&self) -> &[f32] {
        &self.base_score
    }

    #[inline]
    pub fn tree(&self, idx: usize) -> &Tree {
        &self.trees[idx]
    }

    pub fn trees(&self) -> impl Iterator<Item = &Tree> {
        self.trees.iter()
    }

    pub fn validate(&self) -> std::result::Result<(), ForestValidationError> {
        if self.base_score.len() != self.n_groups as usize {
            return Err(ForestValidationError::BaseScoreLenMismatch {
                n_groups: self.n_groups,
                len: self.base_score.len(),
            });
        }
        for (i, &g) in self.tree_groups.iter().enumerate() {
            if g >= self.n_groups {
                return Err(ForestValidationError::TreeGroupOutOfRange {
                    tree_idx: i,
                    group: g,
                    n_groups: self.n_groups,
                });
            }
        }
        Ok(())
    }

    /// Approx buffer `[n_groups, n_objects]` filled with the base score.
    pub fn init_approx(&self, n_objects: usize) -> Array2<f32> {
        let mut approx = Array2::zeros((self.n_groups as usize, n_objects));
        for (mut row, &base) in approx.outer_iter_mut().zip(&self.base_score) {
            row.fill(base);
        }
        approx
    }

    /// Add the contribution of tree `idx` to `approx`.
    ///
    /// Objects are processed in parallel chunks when `parallelism` allows.
    pub fn apply_tree<D: DatasetView>(
        &self,
        idx: usize,
        dataset: &D,
        approx: &mut Array2<f32>,
        parallelism: Parallelism,
    ) -> Result<()> {
        let tree = self.trees.get(idx).ok_or_else(|| {
            EvalError::Internal(format!("tree {idx} out of range ({} trees)", self.trees.len()))
        })?;
        let group = self.tree_groups[idx] as usize;
        let mut row = approx.row_mut(group);
        let out = row
            .as_slice_mut()
            .ok_or_else(|| EvalError::Internal("approx buffer is not contiguous".into()))?;

        match tree.split_feature() {
            None => {
                let value = tree.predict(0.0);
                parallelism.maybe_par_chunks_mut(out, APPLY_CHUNK, |_, chunk| {
                    chunk.iter_mut().for_each(|a| *a += value);
                });
            }
            Some(feature) => {
                let values = dataset.feature_values(feature);
                let values: &[f32] = &values;
                parallelism.maybe_par_chunks_mut(out, APPLY_CHUNK, |offset, chunk| {
                    for (i, a) in chunk.iter_mut().enumerate() {
                        *a += tree.predict(values[offset + i]);
                    }
                });
            }
        }
        Ok(())
    }

    /// Full model output on `dataset`.
    pub fn predict<D: DatasetView>(&self, dataset: &D, parallelism: Parallelism) -> Result<Array2<f32>> {
        let mut approx = self.init_approx(dataset.n_objects() as usize);
        for idx in 0..self.trees.len() {
            self.apply_tree(idx, dataset, &mut approx, parallelism)?;
        }
        Ok(approx)
    }
}

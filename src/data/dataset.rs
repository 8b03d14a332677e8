//! In-memory dataset and the [`DatasetView`] capability interface.
//!
//! Feature storage is feature-major: `features[[feature, object]]`.
//! Two storage variants exist, selected by [`StorageKind`]:
//!
//! - [`StorageKind::Dense`]: raw `f32` values
//! - [`StorageKind::Quantized`]: `u8` bin indices computed from per-feature
//!   borders; the bin index is exposed as the feature value, so every subset
//!   of one quantized dataset shares the same value space.
//!
//! Views are cheap to clone: storage is shared, and hiding features only
//! changes the ignore mask.

use std::borrow::Cow;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1, Axis};

use super::grouping::ObjectsGrouping;
use crate::error::{ensure_config, EvalError, Result};

// =============================================================================
// DatasetView
// =============================================================================

/// Storage variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageKind {
    #[default]
    Dense,
    Quantized,
}

/// What the evaluation core needs from a dataset.
///
/// Implementations must be cheap to clone; fold views are cloned per feature
/// set and per training kind.
pub trait DatasetView: Clone + Send + Sync {
    fn n_objects(&self) -> u32;

    /// Total feature count, including ignored ones.
    fn n_features(&self) -> u32;

    fn grouping(&self) -> &ObjectsGrouping;

    fn group_ids(&self) -> Option<&[u64]>;

    fn timestamps(&self) -> Option<&[u64]>;

    fn targets(&self) -> ArrayView1<'_, f32>;

    /// Whether object order is meaningful and must be preserved.
    fn is_ordered(&self) -> bool;

    fn storage_kind(&self) -> StorageKind;

    /// `false` when the feature is ignored or constant in this view.
    fn is_feature_available(&self, feature: u32) -> bool;

    /// Values of one feature over all objects, in object order.
    fn feature_values(&self, feature: u32) -> Cow<'_, [f32]>;

    /// View restricted to `objects`, in the given order.
    ///
    /// Fails with a resource error when the materialized subset would exceed
    /// `memory_budget` bytes.
    fn subset(&self, objects: &[u32], memory_budget: u64) -> Result<Self>;

    /// View with `ignored` hidden on top of what is already hidden.
    fn features_subset(&self, ignored: &[u32]) -> Result<Self>;

    fn has_available_features(&self) -> bool {
        (0..self.n_features()).any(|f| self.is_feature_available(f))
    }
}

// =============================================================================
// Dataset
// =============================================================================

#[derive(Debug)]
enum FeatureStorage {
    Dense(Array2<f32>),
    Quantized {
        bins: Array2<u8>,
        borders: Vec<Vec<f32>>,
    },
}

impl FeatureStorage {
    fn n_features(&self) -> usize {
        match self {
            Self::Dense(values) => values.nrows(),
            Self::Quantized { bins, .. } => bins.nrows(),
        }
    }

    fn bytes_per_value(&self) -> u64 {
        match self {
            Self::Dense(_) => 4,
            Self::Quantized { .. } => 1,
        }
    }

    fn select_objects(&self, objects: &[usize]) -> Self {
        match self {
            Self::Dense(values) => Self::Dense(values.select(Axis(1), objects)),
            Self::Quantized { bins, borders } => Self::Quantized {
                bins: bins.select(Axis(1), objects),
                borders: borders.clone(),
            },
        }
    }

    fn is_constant(&self, feature: usize) -> bool {
        match self {
            Self::Dense(values) => {
                let row = values.row(feature);
                match row.first() {
                    Some(first) => row.iter().all(|v| v == first || (v.is_nan() && first.is_nan())),
                    None => true,
                }
            }
            Self::Quantized { bins, .. } => {
                let row = bins.row(feature);
                match row.first() {
                    Some(first) => row.iter().all(|v| v == first),
                    None => true,
                }
            }
        }
    }
}

/// In-memory dataset with optional group ids and timestamps.
#[derive(Debug, Clone)]
pub struct Dataset {
    storage: Arc<FeatureStorage>,
    targets: Arc<Array1<f32>>,
    grouping: ObjectsGrouping,
    group_ids: Option<Arc<Vec<u64>>>,
    timestamps: Option<Arc<Vec<u64>>>,
    ignored: Vec<bool>,
    constant: Arc<Vec<bool>>,
    ordered: bool,
}

impl Dataset {
    /// Create a dense dataset.
    ///
    /// `features` has shape `[n_features, n_objects]`.
    pub fn new(features: Array2<f32>, targets: Array1<f32>) -> Result<Self> {
        ensure_config!(
            features.ncols() == targets.len(),
            "feature matrix has {} objects but {} targets were given",
            features.ncols(),
            targets.len()
        );
        let n_objects = targets.len() as u32;
        Ok(Self::from_storage(
            FeatureStorage::Dense(features.as_standard_layout().into_owned()),
            Arc::new(targets),
            ObjectsGrouping::trivial(n_objects),
            None,
            None,
        ))
    }

    fn from_storage(
        storage: FeatureStorage,
        targets: Arc<Array1<f32>>,
        grouping: ObjectsGrouping,
        group_ids: Option<Arc<Vec<u64>>>,
        timestamps: Option<Arc<Vec<u64>>>,
    ) -> Self {
        let n_features = storage.n_features();
        let constant = (0..n_features).map(|f| storage.is_constant(f)).collect();
        Self {
            storage: Arc::new(storage),
            targets,
            grouping,
            group_ids,
            timestamps,
            ignored: vec![false; n_features],
            constant: Arc::new(constant),
            ordered: false,
        }
    }

    /// Attach per-object group ids. Consecutive equal ids form one group.
    pub fn with_group_ids(mut self, group_ids: Vec<u64>) -> Result<Self> {
        ensure_config!(
            group_ids.len() == self.n_objects() as usize,
            "expected {} group ids, got {}",
            self.n_objects(),
            group_ids.len()
        );
        self.grouping = ObjectsGrouping::from_group_ids(&group_ids);
        self.group_ids = Some(Arc::new(group_ids));
        Ok(self)
    }

    /// Attach per-object timestamps.
    pub fn with_timestamps(mut self, timestamps: Vec<u64>) -> Result<Self> {
        ensure_config!(
            timestamps.len() == self.n_objects() as usize,
            "expected {} timestamps, got {}",
            self.n_objects(),
            timestamps.len()
        );
        self.timestamps = Some(Arc::new(timestamps));
        Ok(self)
    }

    /// Hide features globally.
    pub fn with_ignored_features(mut self, ignored: &[u32]) -> Result<Self> {
        self.hide(ignored)?;
        Ok(self)
    }

    /// Mark object order as meaningful.
    pub fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    /// Convert dense storage into quantized storage with at most `max_bins`
    /// bins per feature. Already quantized datasets are returned unchanged.
    pub fn quantize(&self, max_bins: usize) -> Result<Self> {
        ensure_config!(
            (2..=256).contains(&max_bins),
            "max_bins must be in [2, 256], got {max_bins}"
        );
        let values = match self.storage.as_ref() {
            FeatureStorage::Dense(values) => values,
            FeatureStorage::Quantized { .. } => return Ok(self.clone()),
        };

        let (n_features, n_objects) = values.dim();
        let mut bins = Array2::<u8>::zeros((n_features, n_objects));
        let mut borders = Vec::with_capacity(n_features);
        for (feature, row) in values.outer_iter().enumerate() {
            let feature_borders = compute_borders(row, max_bins);
            for (object, &value) in row.iter().enumerate() {
                bins[[feature, object]] = bin_index(&feature_borders, value);
            }
            borders.push(feature_borders);
        }

        let mut quantized = Self::from_storage(
            FeatureStorage::Quantized { bins, borders },
            Arc::clone(&self.targets),
            self.grouping.clone(),
            self.group_ids.clone(),
            self.timestamps.clone(),
        );
        quantized.ignored = self.ignored.clone();
        quantized.ordered = self.ordered;
        Ok(quantized)
    }

    /// Borders of a quantized feature (`None` for dense storage).
    pub fn borders(&self, feature: u32) -> Option<&[f32]> {
        match self.storage.as_ref() {
            FeatureStorage::Dense(_) => None,
            FeatureStorage::Quantized { borders, .. } => {
                borders.get(feature as usize).map(Vec::as_slice)
            }
        }
    }

    /// Indices of features hidden in this view.
    pub fn ignored_features(&self) -> Vec<u32> {
        self.ignored
            .iter()
            .enumerate()
            .filter(|(_, &ignored)| ignored)
            .map(|(f, _)| f as u32)
            .collect()
    }

    /// Approximate memory footprint of `n_objects` materialized objects.
    pub fn estimated_bytes(&self, n_objects: usize) -> u64 {
        let per_object = self.storage.n_features() as u64 * self.storage.bytes_per_value()
            + 4
            + if self.group_ids.is_some() { 8 } else { 0 }
            + if self.timestamps.is_some() { 8 } else { 0 };
        per_object * n_objects as u64
    }

    fn hide(&mut self, ignored: &[u32]) -> Result<()> {
        for &feature in ignored {
            ensure_config!(
                (feature as usize) < self.ignored.len(),
                "feature index {feature} is out of range (dataset has {} features)",
                self.ignored.len()
            );
            self.ignored[feature as usize] = true;
        }
        Ok(())
    }
}

impl DatasetView for Dataset {
    fn n_objects(&self) -> u32 {
        self.targets.len() as u32
    }

    fn n_features(&self) -> u32 {
        self.ignored.len() as u32
    }

    fn grouping(&self) -> &ObjectsGrouping {
        &self.grouping
    }

    fn group_ids(&self) -> Option<&[u64]> {
        self.group_ids.as_deref().map(Vec::as_slice)
    }

    fn timestamps(&self) -> Option<&[u64]> {
        self.timestamps.as_deref().map(Vec::as_slice)
    }

    fn targets(&self) -> ArrayView1<'_, f32> {
        self.targets.view()
    }

    fn is_ordered(&self) -> bool {
        self.ordered
    }

    fn storage_kind(&self) -> StorageKind {
        match self.storage.as_ref() {
            FeatureStorage::Dense(_) => StorageKind::Dense,
            FeatureStorage::Quantized { .. } => StorageKind::Quantized,
        }
    }

    fn is_feature_available(&self, feature: u32) -> bool {
        let f = feature as usize;
        f < self.ignored.len() && !self.ignored[f] && !self.constant[f]
    }

    fn feature_values(&self, feature: u32) -> Cow<'_, [f32]> {
        match self.storage.as_ref() {
            FeatureStorage::Dense(values) => {
                let row = values.row(feature as usize);
                match row.to_slice() {
                    Some(slice) => Cow::Borrowed(slice),
                    None => Cow::Owned(row.to_vec()),
                }
            }
            FeatureStorage::Quantized { bins, .. } => {
                Cow::Owned(bins.row(feature as usize).iter().map(|&b| b as f32).collect())
            }
        }
    }

    fn subset(&self, objects: &[u32], memory_budget: u64) -> Result<Self> {
        let required = self.estimated_bytes(objects.len());
        if required > memory_budget {
            return Err(EvalError::Resource(format!(
                "subset of {} objects needs ~{required} bytes, budget is {memory_budget} bytes",
                objects.len()
            )));
        }
        let n_objects = self.n_objects();
        if let Some(&bad) = objects.iter().find(|&&o| o >= n_objects) {
            return Err(EvalError::Internal(format!(
                "object index {bad} out of range for dataset of {n_objects} objects"
            )));
        }

        let selected: Vec<usize> = objects.iter().map(|&o| o as usize).collect();
        let storage = self.storage.select_objects(&selected);
        let targets = self.targets.select(Axis(0), &selected);
        let group_ids = self
            .group_ids
            .as_ref()
            .map(|ids| Arc::new(selected.iter().map(|&o| ids[o]).collect::<Vec<_>>()));
        let timestamps = self
            .timestamps
            .as_ref()
            .map(|ts| Arc::new(selected.iter().map(|&o| ts[o]).collect::<Vec<_>>()));

        let mut subset = Self::from_storage(
            storage,
            Arc::new(targets),
            self.grouping.subset(objects),
            group_ids,
            timestamps,
        );
        subset.ignored = self.ignored.clone();
        subset.ordered = self.ordered;
        Ok(subset)
    }

    fn features_subset(&self, ignored: &[u32]) -> Result<Self> {
        let mut view = self.clone();
        view.hide(ignored)?;
        Ok(view)
    }
}

// =============================================================================
// Quantization helpers
// =============================================================================

/// Borders at evenly spaced quantiles of the distinct non-NaN values.
fn compute_borders(values: ArrayView1<'_, f32>, max_bins: usize) -> Vec<f32> {
    let mut distinct: Vec<f32> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    distinct.sort_by(f32::total_cmp);
    distinct.dedup();
    if distinct.len() <= 1 {
        return Vec::new();
    }

    let n_borders = (max_bins - 1).min(distinct.len() - 1);
    let mut borders = Vec::with_capacity(n_borders);
    for i in 1..=n_borders {
        let pos = i * distinct.len() / (n_borders + 1);
        let pos = pos.clamp(1, distinct.len() - 1);
        let border = 0.5 * (distinct[pos - 1] + distinct[pos]);
        if borders.last().map_or(true, |&last| border > last) {
            borders.push(border);
        }
    }
    borders
}

/// Number of borders strictly below `value`; NaN maps to bin 0.
#[inline]
fn bin_index(borders: &[f32], value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    borders.partition_point(|&b| b < value) as u8
}

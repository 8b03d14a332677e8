//! Fold partitioning.
//!
//! Turns a grouping (and optional timestamps) into per-fold train/test object
//! subsets. Three strategies are supported:
//!
//! - [`Partitioning::KFold`]: `fold_count` contiguous blocks, test = block,
//!   train = complement
//! - [`Partitioning::FixedSize`]: `⌊N / fold_size⌋` blocks of `fold_size`
//!   units, windowed by `[offset, offset + fold_count)`
//! - [`Partitioning::TimeSplit`]: blocks of units at or before a quantile
//!   timestamp are training subsets; everything after is one shared test tail
//!
//! Block boundaries are a pure function of unit order and counts. Randomness
//! enters only through [`shuffled_objects`], applied by the caller before
//! partitioning.

mod split;

pub use split::{
    complement_subsets, ensure_enough_blocks, find_quantile_timestamp, largest_workable_fold_size,
    quantile_split, shuffled_objects, split_by_groups, split_by_objects, split_by_units, split_into_folds,
    take_window, QuantileSplit,
};

use serde::{Deserialize, Serialize};

use crate::data::{ObjectsGrouping, SamplingUnit};
use crate::error::{ensure_config, EvalError, Result};

/// Train/test object subsets of one fold.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FoldSpec {
    pub train: Vec<u32>,
    pub test: Vec<u32>,
}

/// Orientation of k-fold cross-validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CrossValidationKind {
    /// Hold out one block, train on the remainder.
    #[default]
    Inverted,
    /// Train on one block, test on the remainder. Not supported.
    Classical,
}

/// K-fold cross-validation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CvParams {
    pub fold_count: u32,
    pub kind: CrossValidationKind,
}

impl CvParams {
    pub fn inverted(fold_count: u32) -> Self {
        Self {
            fold_count,
            kind: CrossValidationKind::Inverted,
        }
    }
}

/// Partitioning strategy for one fold range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Partitioning {
    KFold {
        fold_count: u32,
    },
    FixedSize {
        unit: SamplingUnit,
        fold_size: u32,
        offset: u32,
        fold_count: u32,
    },
    TimeSplit {
        unit: SamplingUnit,
        fold_size: u32,
        offset: u32,
        fold_count: u32,
        quantile: f64,
    },
}

impl Partitioning {
    /// Number of folds this partitioning produces.
    pub fn fold_count(&self) -> u32 {
        match *self {
            Self::KFold { fold_count }
            | Self::FixedSize { fold_count, .. }
            | Self::TimeSplit { fold_count, .. } => fold_count,
        }
    }
}

/// Build the folds of one range.
///
/// `timestamps` is required for [`Partitioning::TimeSplit`] and ignored
/// otherwise.
pub fn make_folds(
    grouping: &ObjectsGrouping,
    timestamps: Option<&[u64]>,
    partitioning: &Partitioning,
) -> Result<Vec<FoldSpec>> {
    let n_objects = grouping.n_objects();
    match *partitioning {
        Partitioning::KFold { fold_count } => {
            let tests = split_into_folds(grouping, fold_count)?;
            Ok(pair_with_complements(tests, n_objects))
        }
        Partitioning::FixedSize {
            unit,
            fold_size,
            offset,
            fold_count,
        } => {
            ensure_config!(fold_count > 0, "Fold count must be positive integer");
            let blocks = split_by_units(grouping, unit, fold_size)?;
            let group_sizes: Vec<u32> = grouping.groups().map(|group| group.len()).collect();
            ensure_enough_blocks(&group_sizes, unit, fold_size, blocks.len(), offset + fold_count)?;
            let tests = take_window(blocks, offset, fold_count)?;
            Ok(pair_with_complements(tests, n_objects))
        }
        Partitioning::TimeSplit {
            unit,
            fold_size,
            offset,
            fold_count,
            quantile,
        } => {
            ensure_config!(fold_count > 0, "Fold count must be positive integer");
            let timestamps = timestamps.ok_or_else(|| {
                EvalError::Config("Timesplit feature evaluation requires dataset with timestamps".into())
            })?;
            let quantile_timestamp = find_quantile_timestamp(grouping, timestamps, quantile)?;
            tracing::info!(quantile_timestamp, "Quantile timestamp {quantile_timestamp}");
            let QuantileSplit { train_blocks, test } =
                quantile_split(grouping, timestamps, quantile_timestamp, unit, fold_size)?;
            let early_sizes: Vec<u32> = grouping
                .groups()
                .filter(|group| timestamps[group.begin as usize] <= quantile_timestamp)
                .map(|group| group.len())
                .collect();
            ensure_enough_blocks(&early_sizes, unit, fold_size, train_blocks.len(), offset + fold_count)?;
            let trains = take_window(train_blocks, offset, fold_count)?;
            Ok(trains
                .into_iter()
                .map(|train| FoldSpec {
                    train,
                    test: test.clone(),
                })
                .collect())
        }
    }
}

fn pair_with_complements(tests: Vec<Vec<u32>>, n_objects: u32) -> Vec<FoldSpec> {
    let trains = complement_subsets(&tests, n_objects);
    trains
        .into_iter()
        .zip(tests)
        .map(|(train, test)| FoldSpec { train, test })
        .collect()
}

// =============================================================================
// Fold geometry
// =============================================================================

/// Absolute fold size and the number of disjoint folds one range holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldGeometry {
    /// Units per fold.
    pub fold_size: u32,
    /// `max(1, n_units / fold_size)`.
    pub disjoint_fold_count: u32,
    /// Units eligible for partitioning.
    pub n_units: u32,
}

/// Resolve the fold size and count disjoint folds.
///
/// With `timestamps`, only units whose group timestamp is at or before the
/// `quantile` timestamp count. A `fold_size` of zero means "derive it from
/// `relative_fold_size`".
pub fn count_disjoint_folds(
    grouping: &ObjectsGrouping,
    timestamps: Option<&[u64]>,
    unit: SamplingUnit,
    fold_size: u32,
    relative_fold_size: f32,
    quantile: f64,
) -> Result<FoldGeometry> {
    let n_units = match timestamps {
        None => grouping.n_units(unit),
        Some(timestamps) => {
            let quantile_timestamp = find_quantile_timestamp(grouping, timestamps, quantile)?;
            grouping
                .groups()
                .filter(|group| timestamps[group.begin as usize] <= quantile_timestamp)
                .map(|group| match unit {
                    SamplingUnit::Object => group.len(),
                    SamplingUnit::Group => 1,
                })
                .sum()
        }
    };

    let fold_size = if fold_size > 0 {
        fold_size
    } else {
        let size = (relative_fold_size as f64 * n_units as f64) as u32;
        ensure_config!(
            size > 0,
            "Relative fold size must be greater than {} so that size of each fold is non-zero",
            1.0 / n_units as f64
        );
        size
    };

    Ok(FoldGeometry {
        fold_size,
        disjoint_fold_count: (n_units / fold_size).max(1),
        n_units,
    })
}

// =============================================================================
// Fold ranges
// =============================================================================

/// One pass over a freshly partitioned (and possibly reshuffled) dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldRange {
    /// Index of the range; selects the range seed.
    pub index: u32,
    /// Absolute index of the range's first disjoint fold.
    pub begin: u32,
    /// First fold of the window inside this range.
    pub offset: u32,
    /// Folds evaluated in this range.
    pub fold_count: u32,
}

impl FoldRange {
    /// Absolute index of the `fold`-th fold of this range.
    #[inline]
    pub fn absolute_fold(&self, fold: u32) -> u32 {
        self.begin + self.offset + fold
    }
}

/// Split the global window `[offset, offset + fold_count)` into ranges of at
/// most `disjoint_fold_count` folds.
pub fn plan_fold_ranges(disjoint_fold_count: u32, offset: u32, fold_count: u32) -> Vec<FoldRange> {
    let disjoint = disjoint_fold_count.max(1);
    let mut ranges = Vec::new();
    let mut index = offset / disjoint;
    let mut range_offset = offset % disjoint;
    let mut range_count = (disjoint - range_offset).min(fold_count);
    let mut processed = 0;
    while processed < fold_count {
        ranges.push(FoldRange {
            index,
            begin: index * disjoint,
            offset: range_offset,
            fold_count: range_count,
        });
        processed += range_count;
        index += 1;
        range_offset = 0;
        range_count = disjoint.min(fold_count - processed);
    }
    ranges
}

/// Number of per-range seeds a run needs.
pub fn fold_range_count(disjoint_fold_count: u32, offset: u32, fold_count: u32) -> u32 {
    (offset + fold_count).div_ceil(disjoint_fold_count.max(1))
}

//! Unit-level splitting primitives.
//!
//! All functions work on an [`ObjectsGrouping`] and return object indices.
//! Groups are never split: object-wise splits accumulate whole groups until
//! a block holds at least `fold_size` objects.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::data::{ObjectsGrouping, SamplingUnit};
use crate::error::{ensure_config, ensure_internal, EvalError, Result};

/// Split groups into `fold_count` contiguous blocks of (nearly) equal group
/// count. Earlier blocks receive the remainder.
pub fn split_into_folds(grouping: &ObjectsGrouping, fold_count: u32) -> Result<Vec<Vec<u32>>> {
    ensure_config!(fold_count > 0, "Fold count must be positive integer");
    let n_groups = grouping.n_groups();
    ensure_config!(
        n_groups >= fold_count,
        "Cannot split {n_groups} groups into {fold_count} folds"
    );

    let base = n_groups / fold_count;
    let remainder = n_groups % fold_count;
    let mut blocks = Vec::with_capacity(fold_count as usize);
    let mut begin = 0u32;
    for fold in 0..fold_count {
        let size = base + u32::from(fold < remainder);
        let groups: Vec<u32> = (begin..begin + size).collect();
        blocks.push(grouping.expand_groups(&groups));
        begin += size;
    }
    Ok(blocks)
}

/// Blocks of whole groups holding at least `fold_size` objects each.
/// A trailing partial block is dropped.
pub fn split_by_objects(grouping: &ObjectsGrouping, fold_size: u32) -> Result<Vec<Vec<u32>>> {
    ensure_config!(fold_size > 0, "Fold size must be positive integer");
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for group in grouping.groups() {
        current.extend(group.objects());
        if current.len() as u32 >= fold_size {
            blocks.push(std::mem::take(&mut current));
        }
    }
    Ok(blocks)
}

/// Blocks of exactly `fold_size` groups. A trailing partial block is dropped.
pub fn split_by_groups(grouping: &ObjectsGrouping, fold_size: u32) -> Result<Vec<Vec<u32>>> {
    ensure_config!(fold_size > 0, "Fold size must be positive integer");
    let n_blocks = grouping.n_groups() / fold_size;
    let blocks = (0..n_blocks)
        .map(|block| {
            let groups: Vec<u32> = (block * fold_size..(block + 1) * fold_size).collect();
            grouping.expand_groups(&groups)
        })
        .collect();
    Ok(blocks)
}

/// Dispatch on the sampling unit.
pub fn split_by_units(
    grouping: &ObjectsGrouping,
    unit: SamplingUnit,
    fold_size: u32,
) -> Result<Vec<Vec<u32>>> {
    match unit {
        SamplingUnit::Object => split_by_objects(grouping, fold_size),
        SamplingUnit::Group => split_by_groups(grouping, fold_size),
    }
}

/// For each test subset, all objects not in it (in object order).
pub fn complement_subsets(test_subsets: &[Vec<u32>], n_objects: u32) -> Vec<Vec<u32>> {
    test_subsets
        .iter()
        .map(|test| {
            let mut in_test = vec![false; n_objects as usize];
            for &object in test {
                in_test[object as usize] = true;
            }
            (0..n_objects).filter(|&o| !in_test[o as usize]).collect()
        })
        .collect()
}

/// Number of blocks [`split_by_units`] forms over groups of `group_sizes`.
fn count_blocks(group_sizes: &[u32], unit: SamplingUnit, fold_size: u32) -> u32 {
    match unit {
        SamplingUnit::Group => group_sizes.len() as u32 / fold_size,
        SamplingUnit::Object => {
            let mut blocks = 0;
            let mut current = 0;
            for &size in group_sizes {
                current += size;
                if current >= fold_size {
                    blocks += 1;
                    current = 0;
                }
            }
            blocks
        }
    }
}

/// Largest fold size below `fold_size` that still forms `needed` blocks.
///
/// The block count never grows with the fold size, so a binary search over
/// `[1, fold_size)` finds it.
pub fn largest_workable_fold_size(
    group_sizes: &[u32],
    unit: SamplingUnit,
    fold_size: u32,
    needed: u32,
) -> Option<u32> {
    if fold_size <= 1 || count_blocks(group_sizes, unit, 1) < needed {
        return None;
    }
    let (mut lo, mut hi) = (1, fold_size - 1);
    while lo < hi {
        let mid = lo + (hi - lo + 1) / 2;
        if count_blocks(group_sizes, unit, mid) >= needed {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    Some(lo)
}

/// Fail unless `n_blocks` blocks cover `needed` folds.
///
/// Groups are never split, so group granularity can leave fewer blocks than
/// `n_units / fold_size`.
pub fn ensure_enough_blocks(
    group_sizes: &[u32],
    unit: SamplingUnit,
    fold_size: u32,
    n_blocks: usize,
    needed: u32,
) -> Result<()> {
    if n_blocks as u64 >= u64::from(needed) {
        return Ok(());
    }
    let advice = match largest_workable_fold_size(group_sizes, unit, fold_size, needed) {
        Some(size) => format!("Please decrease fold size to at most {size}"),
        None => "Please evaluate fewer folds or use a smaller offset".to_string(),
    };
    Err(EvalError::Resource(format!(
        "Dataset groups form only {n_blocks} folds of size {fold_size}, {needed} are required. {advice}"
    )))
}

/// Keep `count` subsets starting at `offset`.
pub fn take_window<T>(subsets: Vec<T>, offset: u32, count: u32) -> Result<Vec<T>> {
    ensure_internal!(
        (offset + count) as usize <= subsets.len(),
        "Dataset permutation logic failed: window [{offset}, {}) exceeds {} subsets",
        offset + count,
        subsets.len()
    );
    Ok(subsets
        .into_iter()
        .skip(offset as usize)
        .take(count as usize)
        .collect())
}

/// Timestamp at `quantile` over per-group representative timestamps
/// (the first timestamp of each group).
pub fn find_quantile_timestamp(
    grouping: &ObjectsGrouping,
    timestamps: &[u64],
    quantile: f64,
) -> Result<u64> {
    ensure_config!(
        (0.0..=1.0).contains(&quantile),
        "Time split quantile must be in [0, 1], got {quantile}"
    );
    ensure_internal!(
        timestamps.len() == grouping.n_objects() as usize,
        "{} timestamps for {} objects",
        timestamps.len(),
        grouping.n_objects()
    );
    let mut group_timestamps: Vec<u64> = grouping
        .groups()
        .map(|group| timestamps[group.begin as usize])
        .collect();
    ensure_config!(!group_timestamps.is_empty(), "Time split requires a non-empty dataset");
    group_timestamps.sort_unstable();
    let idx = ((group_timestamps.len() as f64 * quantile) as usize).min(group_timestamps.len() - 1);
    Ok(group_timestamps[idx])
}

/// Result of a time-ordered quantile split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantileSplit {
    /// Disjoint blocks of units at or before the quantile timestamp.
    pub train_blocks: Vec<Vec<u32>>,
    /// All objects of groups past the quantile timestamp.
    pub test: Vec<u32>,
}

/// Split units at or before `quantile_timestamp` into blocks of `fold_size`
/// units and put everything after it into one shared test subset.
pub fn quantile_split(
    grouping: &ObjectsGrouping,
    timestamps: &[u64],
    quantile_timestamp: u64,
    unit: SamplingUnit,
    fold_size: u32,
) -> Result<QuantileSplit> {
    ensure_config!(fold_size > 0, "Fold size must be positive integer");
    let mut early_groups = Vec::new();
    let mut late_groups = Vec::new();
    for (idx, group) in grouping.groups().enumerate() {
        if timestamps[group.begin as usize] <= quantile_timestamp {
            early_groups.push(idx as u32);
        } else {
            late_groups.push(idx as u32);
        }
    }

    let mut train_blocks = Vec::new();
    match unit {
        SamplingUnit::Object => {
            let mut current = Vec::new();
            for &idx in &early_groups {
                current.extend(grouping.group(idx).objects());
                if current.len() as u32 >= fold_size {
                    train_blocks.push(std::mem::take(&mut current));
                }
            }
        }
        SamplingUnit::Group => {
            for chunk in early_groups.chunks(fold_size as usize) {
                if chunk.len() as u32 == fold_size {
                    train_blocks.push(grouping.expand_groups(chunk));
                }
            }
        }
    }

    let test = grouping.expand_groups(&late_groups);
    ensure_config!(
        !test.is_empty(),
        "Time split left no objects after timestamp {quantile_timestamp}; decrease the time split quantile"
    );
    Ok(QuantileSplit { train_blocks, test })
}

/// Object permutation that shuffles whole groups (Fisher-Yates over groups).
pub fn shuffled_objects(grouping: &ObjectsGrouping, seed: u64) -> Vec<u32> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut groups: Vec<u32> = (0..grouping.n_groups()).collect();
    groups.shuffle(&mut rng);
    grouping.expand_groups(&groups)
}

//! Dataset abstractions consumed by the evaluation core.
//!
//! - [`DatasetView`]: capability interface (subsetting, feature masking,
//!   grouping and timestamp accessors)
//! - [`Dataset`]: in-memory implementation with dense or quantized storage
//! - [`ObjectsGrouping`]: contiguous object groups; the basis of group-wise
//!   sampling units

mod dataset;
mod grouping;

pub use dataset::{Dataset, DatasetView, StorageKind};
pub use grouping::{Group, ObjectsGrouping, SamplingUnit};

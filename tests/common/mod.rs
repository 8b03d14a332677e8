//! Shared fixtures for integration tests: synthetic datasets, instrumented
//! trainers and log capture.

#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use boosters_eval::booster::{BoostingParams, StumpBooster, Trainer, TrainingCallbacks};
use boosters_eval::data::{Dataset, DatasetView};
use boosters_eval::eval::FoldContext;
use boosters_eval::metrics::Metric;
use boosters_eval::{EvalError, Parallelism, Result};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use tracing_subscriber::fmt::MakeWriter;

// =============================================================================
// Datasets
// =============================================================================

/// Feature that drives most of the target.
pub const STRONG: u32 = 0;
/// Feature with a small effect on the target.
pub const WEAK: u32 = 1;
/// Pure noise.
pub const NOISE: u32 = 2;
/// Same value for every object.
pub const CONSTANT: u32 = 3;
pub const N_FEATURES: usize = 4;

/// `target = 4 · strong + weak + 0.05 · noise`, uniform features.
pub fn regression_dataset(n_objects: usize, seed: u64) -> Dataset {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut features = Array2::zeros((N_FEATURES, n_objects));
    let mut targets = Array1::zeros(n_objects);
    for i in 0..n_objects {
        let strong: f32 = rng.gen();
        let weak: f32 = rng.gen();
        let noise: f32 = rng.gen();
        features[[STRONG as usize, i]] = strong;
        features[[WEAK as usize, i]] = weak;
        features[[NOISE as usize, i]] = noise;
        features[[CONSTANT as usize, i]] = 1.0;
        targets[i] = 4.0 * strong + weak + 0.05 * noise;
    }
    Dataset::new(features, targets).expect("valid dataset")
}

/// [`regression_dataset`] with `n_groups` groups of `group_size` objects.
///
/// Group `g` has timestamp `g` when `with_timestamps` is set.
pub fn grouped_dataset(n_groups: usize, group_size: usize, with_timestamps: bool, seed: u64) -> Dataset {
    let n_objects = n_groups * group_size;
    let group_ids: Vec<u64> = (0..n_objects).map(|i| (i / group_size) as u64).collect();
    let dataset = regression_dataset(n_objects, seed)
        .with_group_ids(group_ids.clone())
        .expect("valid group ids");
    if with_timestamps {
        dataset.with_timestamps(group_ids).expect("valid timestamps")
    } else {
        dataset
    }
}

// =============================================================================
// Trainers
// =============================================================================

pub fn stump_trainer(n_iterations: u32) -> StumpBooster {
    StumpBooster::new(
        BoostingParams::builder()
            .n_iterations(n_iterations)
            .learning_rate(0.5)
            .build()
            .expect("valid params"),
    )
}

pub fn metrics() -> Vec<Metric> {
    vec![Metric::rmse(), Metric::mae()]
}

/// Counts training calls and optionally fails one of them, simulating a
/// process killed mid-run.
#[derive(Debug)]
pub struct CountingTrainer<T> {
    inner: T,
    calls: AtomicU32,
    fail_at: Option<u32>,
    /// `(fold_idx, nth)`: fail the `nth` training of that fold (1-based).
    fail_on_fold: Option<(u32, u32)>,
    fold_hits: AtomicU32,
}

impl<T> CountingTrainer<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            calls: AtomicU32::new(0),
            fail_at: None,
            fail_on_fold: None,
            fold_hits: AtomicU32::new(0),
        }
    }

    /// Fail the `call`-th training (1-based).
    pub fn failing_at(inner: T, call: u32) -> Self {
        Self {
            fail_at: Some(call),
            ..Self::new(inner)
        }
    }

    /// Fail the `nth` training of absolute fold `fold_idx`. Unlike
    /// [`Self::failing_at`] this does not depend on the order in which
    /// concurrent folds start.
    pub fn failing_on_fold(inner: T, fold_idx: u32, nth: u32) -> Self {
        Self {
            fail_on_fold: Some((fold_idx, nth)),
            ..Self::new(inner)
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<T: Trainer> Trainer for CountingTrainer<T> {
    fn approx_dimension(&self) -> u32 {
        self.inner.approx_dimension()
    }

    fn iteration_count(&self) -> u32 {
        self.inner.iteration_count()
    }

    fn train<D: DatasetView>(
        &self,
        train_dir: Option<&Path>,
        metrics: &[Metric],
        fold: &mut FoldContext<D>,
        callbacks: &mut dyn TrainingCallbacks,
        parallelism: Parallelism,
    ) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_at == Some(call) {
            return Err(EvalError::Internal(format!("training interrupted at call {call}")));
        }
        if let Some((fold_idx, nth)) = self.fail_on_fold {
            if fold.fold_idx == fold_idx && self.fold_hits.fetch_add(1, Ordering::SeqCst) + 1 == nth {
                return Err(EvalError::Internal(format!("training interrupted on fold {fold_idx}")));
            }
        }
        self.inner.train(train_dir, metrics, fold, callbacks, parallelism)
    }
}

// =============================================================================
// Log capture
// =============================================================================

/// In-memory writer for a `tracing_subscriber::fmt` subscriber.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("log buffer lock")).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("log buffer lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run `f` with a debug-level subscriber and return its output with the logs.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, buffer.contents())
}

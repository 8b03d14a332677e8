//! Common utilities used across the crate.
//!
//! This module provides the parallelism flag and the explicit execution
//! context (thread pool handle) passed to every component that does parallel
//! work.

use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{EvalError, Result};

// =============================================================================
// Parallelism Configuration
// =============================================================================

/// Whether parallel execution is allowed.
///
/// This is a simple flag passed through components. When `Parallel`,
/// components may use `rayon` parallel iterators; when `Sequential` they
/// must iterate on the calling thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parallelism {
    Sequential,
    Parallel,
}

impl Parallelism {
    /// Returns `true` if parallel execution is allowed.
    #[inline]
    pub fn is_parallel(self) -> bool {
        matches!(self, Parallelism::Parallel)
    }

    #[inline]
    pub fn maybe_par_map<T, B, I, F>(self, iter: I, f: F) -> Vec<B>
    where
        T: Send,
        B: Send,
        I: IntoIterator<Item = T> + IntoParallelIterator<Item = T>,
        F: Fn(T) -> B + Sync + Send,
    {
        if self.is_parallel() {
            iter.into_par_iter().map(f).collect()
        } else {
            iter.into_iter().map(f).collect()
        }
    }

    /// Apply `f` to consecutive `chunk_size` blocks of `data`.
    ///
    /// `f` receives the offset of the chunk's first element.
    #[inline]
    pub fn maybe_par_chunks_mut<T, F>(self, data: &mut [T], chunk_size: usize, f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync + Send,
    {
        let chunk_size = chunk_size.max(1);
        if self.is_parallel() {
            data.par_chunks_mut(chunk_size)
                .enumerate()
                .for_each(|(i, chunk)| f(i * chunk_size, chunk));
        } else {
            data.chunks_mut(chunk_size)
                .enumerate()
                .for_each(|(i, chunk)| f(i * chunk_size, chunk));
        }
    }
}

// =============================================================================
// Execution Context
// =============================================================================

/// Explicit handle to the worker pool used by an evaluation run.
///
/// Components never reach for the global rayon pool; they receive this
/// handle and run their parallel sections inside [`ExecutionContext::install`].
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pool: Arc<rayon::ThreadPool>,
    parallelism: Parallelism,
}

impl ExecutionContext {
    /// Build a context with its own pool.
    ///
    /// Thread count semantics:
    /// - `0` = auto (use all available cores)
    /// - `1` = sequential
    /// - `n > 1` = use exactly `n` threads
    pub fn new(n_threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|i| format!("boosters-eval-{i}"))
            .build()
            .map_err(|e| EvalError::Resource(format!("failed to create thread pool: {e}")))?;
        let parallelism = if n_threads == 1 || pool.current_num_threads() == 1 {
            Parallelism::Sequential
        } else {
            Parallelism::Parallel
        };
        Ok(Self {
            pool: Arc::new(pool),
            parallelism,
        })
    }

    /// Run `f` inside the context's pool.
    ///
    /// `f` logs to the caller's default `tracing` subscriber.
    pub fn install<T: Send>(&self, f: impl FnOnce(Parallelism) -> T + Send) -> T {
        let parallelism = self.parallelism;
        let dispatch = tracing::dispatcher::get_default(Clone::clone);
        self.pool
            .install(move || tracing::dispatcher::with_default(&dispatch, || f(parallelism)))
    }
}

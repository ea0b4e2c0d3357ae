//! Parallel batch lookups using Rayon
//!
//! Resolves a list of addresses on a dedicated thread pool. Results come back
//! in input order and a failed lookup only affects its own entry.

use anyhow::Result;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use iploc_core::Location;
use iploc_index::LookupEngine;

const PROGRESS_EVERY: usize = 10_000;

/// Outcome of one batch entry
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub input: String,
    /// `Ok(None)` when no range covers the address
    pub result: Result<Option<Location>, String>,
}

/// Batch processor with parallel execution
pub struct BatchProcessor {
    engine: Arc<LookupEngine>,
    thread_pool: rayon::ThreadPool,
}

impl BatchProcessor {
    /// Create a processor; `num_threads` defaults to the CPU count
    pub fn new(engine: Arc<LookupEngine>, num_threads: Option<usize>) -> Result<Self> {
        let num_threads = num_threads.unwrap_or_else(num_cpus::get).max(1);
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|idx| format!("iploc-batch-{}", idx))
            .build()?;

        Ok(Self {
            engine,
            thread_pool,
        })
    }

    /// Resolve every input, preserving order
    pub fn process(&self, inputs: Vec<String>) -> Vec<BatchResult> {
        let total = inputs.len();
        let processed = AtomicUsize::new(0);

        self.thread_pool.install(|| {
            inputs
                .into_par_iter()
                .map(|input| {
                    let result = self.engine.locate(&input).map_err(|e| e.to_string());

                    let count = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    if count % PROGRESS_EVERY == 0 || count == total {
                        debug!("Processed {}/{} addresses", count, total);
                    }

                    BatchResult { input, result }
                })
                .collect()
        })
    }

    pub fn thread_count(&self) -> usize {
        self.thread_pool.current_num_threads()
    }
}

// src/exec/worker.rs

//! Pluggable worker abstraction.
//!
//! Production code implements [`Worker`] over the real network client; tests
//! can provide one that records started operations and reports outcomes on
//! demand.

use crate::engine::Pipeline;
use crate::graph::Operation;

/// Receives operations the pipeline has moved to `Active`.
///
/// `start_operation` is called exactly once per dispatch, from the
/// pipeline's dispatcher task and never while the pipeline lock is held. It
/// should return quickly (spawn the actual work) and report the outcome
/// later through `pipeline`.
pub trait Worker: Send + Sync + 'static {
    fn start_operation(&self, operation: Operation, pipeline: &Pipeline);
}

impl<F> Worker for F
where
    F: Fn(Operation, &Pipeline) + Send + Sync + 'static,
{
    fn start_operation(&self, operation: Operation, pipeline: &Pipeline) {
        self(operation, pipeline)
    }
}

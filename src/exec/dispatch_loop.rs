// src/exec/dispatch_loop.rs

//! Task that hands dispatched operations to the worker.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::pipeline::WeakPipeline;
use crate::exec::Worker;
use crate::graph::Operation;

/// Spawn the background dispatcher loop.
///
/// Operations arrive in dispatch order over `rx` and are passed to
/// `worker.start_operation` one at a time. The loop holds only a weak
/// reference to the pipeline and exits once the pipeline is dropped (the
/// channel closes).
pub fn spawn_dispatcher(
    pipeline: WeakPipeline,
    mut rx: mpsc::UnboundedReceiver<Operation>,
    worker: Arc<dyn Worker>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("dispatcher loop started");

        while let Some(operation) = rx.recv().await {
            let Some(pipeline) = pipeline.upgrade() else {
                warn!(op = %operation.id(), "pipeline dropped before operation could start");
                break;
            };
            debug!(
                op = %operation.id(),
                snapshot = operation.snapshot(),
                "handing operation to worker"
            );
            worker.start_operation(operation, &pipeline);
        }

        info!("dispatcher loop finished (channel closed)");
    })
}

// src/exec/simulated.rs

//! Timer-driven stand-in for a real network worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::config::WorkerSection;
use crate::engine::Pipeline;
use crate::exec::Worker;
use crate::graph::{Operation, OperationId};

/// Worker that "performs" each operation by sleeping.
///
/// The first `fail_first_attempts` attempts of every operation fail and are
/// reset to pending with a `retry_delay_ms` hold; the next attempt completes
/// the operation.
#[derive(Debug, Clone)]
pub struct SimulatedWorker {
    settings: WorkerSection,
    attempts: Arc<Mutex<HashMap<OperationId, u32>>>,
}

impl SimulatedWorker {
    pub fn new(settings: WorkerSection) -> Self {
        Self {
            settings,
            attempts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Attempts started so far for `id`.
    pub fn attempts(&self, id: OperationId) -> u32 {
        self.attempts.lock().get(&id).copied().unwrap_or(0)
    }
}

/// Plan name carried in the payload, falling back to the identifier.
fn display_name(op: &Operation) -> String {
    op.payload()
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| op.id().to_string())
}

impl Worker for SimulatedWorker {
    fn start_operation(&self, operation: Operation, pipeline: &Pipeline) {
        let id = operation.id();
        let name = display_name(&operation);
        let attempt = {
            let mut attempts = self.attempts.lock();
            let n = attempts.entry(id).or_insert(0);
            *n += 1;
            *n
        };

        let duration = Duration::from_millis(self.settings.duration_ms);
        let retry_delay = Duration::from_millis(self.settings.retry_delay_ms);
        let fails = attempt <= self.settings.fail_first_attempts;
        let pipeline = pipeline.clone();

        info!(op = %name, attempt, snapshot = operation.snapshot(), "starting simulated operation");

        tokio::spawn(async move {
            tokio::time::sleep(duration).await;

            let result = if fails {
                warn!(op = %name, attempt, ?retry_delay, "simulated attempt failed; retrying later");
                pipeline.reset_to_pending(id, Some(retry_delay))
            } else {
                info!(op = %name, attempt, "simulated operation completed");
                pipeline.complete_operation(id)
            };

            if let Err(err) = result {
                error!(op = %name, error = %err, "failed to report simulated outcome");
            }
        });
    }
}

use std::sync::{Arc, Mutex};

use syncpipe::engine::Pipeline;
use syncpipe::exec::Worker;
use syncpipe::graph::{Operation, OperationId};
use tokio::sync::Notify;

/// What the worker does after recording a started operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Nothing; the test reports outcomes itself.
    Manual,
    /// Complete the operation synchronously, from inside `start_operation`.
    CompleteImmediately,
}

/// A fake worker that:
/// - records which operations were started, in order
/// - records the largest number of active operations seen at start time
/// - optionally completes each operation right away.
pub struct RecordingWorker {
    reply: Reply,
    started: Mutex<Vec<OperationId>>,
    peak_active: Mutex<usize>,
    notify: Notify,
}

impl RecordingWorker {
    pub fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            started: Mutex::new(Vec::new()),
            peak_active: Mutex::new(0),
            notify: Notify::new(),
        })
    }

    pub fn manual() -> Arc<Self> {
        Self::new(Reply::Manual)
    }

    pub fn completing() -> Arc<Self> {
        Self::new(Reply::CompleteImmediately)
    }

    pub fn started(&self) -> Vec<OperationId> {
        self.started.lock().unwrap().clone()
    }

    pub fn peak_active(&self) -> usize {
        *self.peak_active.lock().unwrap()
    }

    /// Wait until at least `n` operations have been started.
    pub async fn wait_for_started(&self, n: usize) {
        loop {
            let notified = self.notify.notified();
            if self.started.lock().unwrap().len() >= n {
                return;
            }
            notified.await;
        }
    }
}

impl Worker for RecordingWorker {
    fn start_operation(&self, operation: Operation, pipeline: &Pipeline) {
        let active = pipeline.active_operations().len();
        {
            let mut peak = self.peak_active.lock().unwrap();
            *peak = (*peak).max(active);
        }
        self.started.lock().unwrap().push(operation.id());
        self.notify.notify_waiters();

        if self.reply == Reply::CompleteImmediately {
            pipeline
                .complete_operation(operation.id())
                .expect("completing a just-started operation");
        }
    }
}

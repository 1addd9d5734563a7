use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use syncpipe::errors::{PipelineError, Result};
use syncpipe::graph::{DependencyEdge, Operation, OperationId};
use syncpipe::store::{MemoryStore, OperationStore};
use syncpipe::types::OperationStatus;

/// A `MemoryStore` whose status writes can be made to fail, either for
/// selected operations or for all of them. Hold-only writes, saves and
/// deletes always go through.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    failing: Mutex<HashSet<OperationId>>,
    fail_all_status: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn fail_status_writes_for(&self, id: OperationId) {
        self.failing.lock().unwrap().insert(id);
    }

    pub fn fail_all_status_writes(&self, fail: bool) {
        self.fail_all_status.store(fail, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
        self.fail_all_status_writes(false);
    }

    fn check_status_write(&self, id: OperationId) -> Result<()> {
        if self.fail_all_status.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&id) {
            return Err(PipelineError::Storage(format!("status write for {id} refused")));
        }
        Ok(())
    }
}

impl OperationStore for FlakyStore {
    fn save_graph(&self, snapshot: u64, operations: &[Operation], edges: &[DependencyEdge]) -> Result<()> {
        self.inner.save_graph(snapshot, operations, edges)
    }

    fn update_status(&self, id: OperationId, status: OperationStatus) -> Result<()> {
        self.check_status_write(id)?;
        self.inner.update_status(id, status)
    }

    fn update_hold(&self, id: OperationId, hold_until: Option<DateTime<Utc>>) -> Result<()> {
        self.inner.update_hold(id, hold_until)
    }

    fn update_status_and_hold(
        &self,
        id: OperationId,
        status: OperationStatus,
        hold_until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.check_status_write(id)?;
        self.inner.update_status_and_hold(id, status, hold_until)
    }

    fn delete_operation(&self, id: OperationId) -> Result<()> {
        self.inner.delete_operation(id)
    }
}

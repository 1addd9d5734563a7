// src/store/mod.rs

//! Durable storage collaborator.
//!
//! The pipeline mirrors every status and hold change to an [`OperationStore`]
//! *before* applying it in memory. If the store refuses a write, the
//! transition is rejected and nothing changes. The real table lives outside
//! this crate; [`MemoryStore`] is an in-process implementation used by tests
//! and the CLI.

pub mod memory;

use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::graph::{DependencyEdge, Operation, OperationId};
use crate::types::OperationStatus;

pub use memory::MemoryStore;

/// Persistent table of operations keyed by identifier.
pub trait OperationStore: Send + Sync {
    /// Persist every operation of a commit, plus the dependency edges it adds
    /// onto already-stored operations, in one write. Records that already
    /// exist are replaced. Either everything is written or nothing is.
    fn save_graph(&self, snapshot: u64, operations: &[Operation], edges: &[DependencyEdge]) -> Result<()>;

    fn update_status(&self, id: OperationId, status: OperationStatus) -> Result<()>;

    fn update_hold(&self, id: OperationId, hold_until: Option<DateTime<Utc>>) -> Result<()>;

    /// Write a status and a hold together, so a failure leaves neither
    /// changed.
    fn update_status_and_hold(
        &self,
        id: OperationId,
        status: OperationStatus,
        hold_until: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Delete a finalized (completed or skipped) operation.
    fn delete_operation(&self, id: OperationId) -> Result<()>;
}

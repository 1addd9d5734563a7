// src/engine/diagnostics.rs

//! Stall diagnostics.
//!
//! A cyclic or unsatisfiable dependency set is not an error the scheduler can
//! raise at any particular call; it is a standing condition where pending
//! work exists, nothing runs, and nothing ever becomes ready. This module
//! describes that condition for callers that want to detect it.

use crate::graph::OperationId;

/// A pending operation that cannot start because of its dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedOperation {
    pub id: OperationId,
    pub snapshot: u64,
    pub graph_index: usize,
    /// Declared dependencies that are not yet terminal.
    pub unmet_dependencies: Vec<OperationId>,
}

/// Snapshot of a stalled pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StallReport {
    pub pending: usize,
    pub blocked: Vec<BlockedOperation>,
}

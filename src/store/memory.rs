// src/store/memory.rs

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::commit::{CommitSource, RestoredGraph};
use crate::engine::PipelineNames;
use crate::errors::{PipelineError, Result};
use crate::graph::{DependencyEdge, Operation, OperationId};
use crate::store::OperationStore;
use crate::types::OperationStatus;

#[derive(Debug, Default)]
struct Tables {
    /// Operations per commit snapshot, in insertion order.
    graphs: BTreeMap<u64, Vec<Operation>>,
    snapshot_of: HashMap<OperationId, u64>,
}

impl Tables {
    fn get_mut(&mut self, id: OperationId) -> Result<&mut Operation> {
        let snapshot = self
            .snapshot_of
            .get(&id)
            .copied()
            .ok_or(PipelineError::UnknownOperation(id))?;
        self.graphs
            .get_mut(&snapshot)
            .and_then(|ops| ops.iter_mut().find(|op| op.id == id))
            .ok_or(PipelineError::UnknownOperation(id))
    }
}

/// In-memory operation table.
///
/// Survives a pipeline being dropped and rebuilt, which makes it usable as a
/// [`CommitSource`] to simulate a relaunch. `set_read_only(true)` makes every
/// write fail, for exercising rejected transitions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    read_only: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_read_only(&self, read_only: bool) {
        *self.read_only.lock() = read_only;
    }

    fn ensure_writable(&self) -> Result<()> {
        if *self.read_only.lock() {
            return Err(PipelineError::Storage("store is read-only".to_string()));
        }
        Ok(())
    }

    /// Copy of the stored record, if present.
    pub fn get(&self, id: OperationId) -> Option<Operation> {
        let mut tables = self.tables.lock();
        tables.get_mut(id).ok().map(|op| op.clone())
    }

    pub fn len(&self) -> usize {
        self.tables.lock().snapshot_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OperationStore for MemoryStore {
    fn save_graph(&self, snapshot: u64, operations: &[Operation], edges: &[DependencyEdge]) -> Result<()> {
        self.ensure_writable()?;
        let mut tables = self.tables.lock();

        // Validate every edge before touching anything.
        let batch: HashSet<OperationId> = operations.iter().map(|op| op.id).collect();
        for edge in edges {
            if !batch.contains(&edge.operation) && !tables.snapshot_of.contains_key(&edge.operation) {
                return Err(PipelineError::UnknownOperation(edge.operation));
            }
        }

        for op in operations {
            // Saving an existing record replaces it.
            if let Some(previous) = tables.snapshot_of.insert(op.id, snapshot) {
                if let Some(ops) = tables.graphs.get_mut(&previous) {
                    ops.retain(|stored| stored.id != op.id);
                }
            }
        }
        tables.graphs.retain(|_, ops| !ops.is_empty());
        tables
            .graphs
            .entry(snapshot)
            .or_default()
            .extend(operations.iter().cloned());

        for edge in edges {
            tables.get_mut(edge.operation)?.dependencies.insert(edge.depends_on);
        }
        debug!(snapshot, count = operations.len(), edges = edges.len(), "stored graph");
        Ok(())
    }

    fn update_status(&self, id: OperationId, status: OperationStatus) -> Result<()> {
        self.ensure_writable()?;
        self.tables.lock().get_mut(id)?.status = status;
        Ok(())
    }

    fn update_hold(&self, id: OperationId, hold_until: Option<DateTime<Utc>>) -> Result<()> {
        self.ensure_writable()?;
        self.tables.lock().get_mut(id)?.hold_until = hold_until;
        Ok(())
    }

    fn update_status_and_hold(
        &self,
        id: OperationId,
        status: OperationStatus,
        hold_until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.ensure_writable()?;
        let mut tables = self.tables.lock();
        let op = tables.get_mut(id)?;
        op.status = status;
        op.hold_until = hold_until;
        Ok(())
    }

    fn delete_operation(&self, id: OperationId) -> Result<()> {
        self.ensure_writable()?;
        let mut tables = self.tables.lock();
        let Some(snapshot) = tables.snapshot_of.remove(&id) else {
            return Err(PipelineError::UnknownOperation(id));
        };
        if let Some(ops) = tables.graphs.get_mut(&snapshot) {
            ops.retain(|op| op.id != id);
            if ops.is_empty() {
                tables.graphs.remove(&snapshot);
            }
        }
        Ok(())
    }
}

impl CommitSource for MemoryStore {
    fn restore_graphs(&self, names: &PipelineNames) -> Result<Vec<RestoredGraph>> {
        let tables = self.tables.lock();
        let restored = tables
            .graphs
            .iter()
            .filter_map(|(snapshot, ops)| {
                let operations: Vec<Operation> = ops
                    .iter()
                    .filter(|op| names.matches(&op.pipeline))
                    .cloned()
                    .collect();
                (!operations.is_empty()).then_some(RestoredGraph {
                    snapshot: *snapshot,
                    operations,
                })
            })
            .collect();
        Ok(restored)
    }
}

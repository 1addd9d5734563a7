// src/graph/queue.rs

use std::collections::HashMap;

use tracing::debug;

use crate::errors::{PipelineError, Result};
use crate::graph::OperationId;

/// The operations produced by a single commit, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Graph {
    snapshot: u64,
    members: Vec<OperationId>,
}

impl Graph {
    pub fn new(snapshot: u64, members: Vec<OperationId>) -> Self {
        Self { snapshot, members }
    }

    pub fn snapshot(&self) -> u64 {
        self.snapshot
    }

    /// Member identifiers in insertion order.
    pub fn members(&self) -> &[OperationId] {
        &self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Ordered sequence of live graphs, oldest commit first.
///
/// A graph's position (its *graph index*) is volatile and shifts whenever an
/// earlier graph drains. The snapshot is the only stable identifier, so the
/// queue keeps a `snapshot -> index` map that is rebuilt on every prune.
#[derive(Debug, Default)]
pub struct GraphQueue {
    graphs: Vec<Graph>,
    index_by_snapshot: HashMap<u64, usize>,
    /// Highest snapshot ever accepted, including pruned and empty commits.
    latest_snapshot: Option<u64>,
}

impl GraphQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject snapshots that do not strictly follow every snapshot seen so far.
    pub fn check_snapshot(&self, snapshot: u64) -> Result<()> {
        match self.latest_snapshot {
            Some(latest) if snapshot <= latest => {
                Err(PipelineError::OrderingViolation { snapshot, latest })
            }
            _ => Ok(()),
        }
    }

    /// Record a commit snapshot and, if it produced operations, enqueue its
    /// graph.
    ///
    /// Callers must run [`GraphQueue::check_snapshot`] first; this only
    /// re-checks so that a misuse can never reorder the queue.
    pub fn push(&mut self, graph: Graph) -> Result<()> {
        self.check_snapshot(graph.snapshot)?;
        self.latest_snapshot = Some(graph.snapshot);

        if graph.is_empty() {
            debug!(snapshot = graph.snapshot, "commit produced no operations; no graph queued");
            return Ok(());
        }

        self.index_by_snapshot
            .insert(graph.snapshot, self.graphs.len());
        self.graphs.push(graph);
        Ok(())
    }

    /// Remove every graph for which `is_drained` returns true.
    ///
    /// Returns the removed graphs (oldest first) so the caller can drop their
    /// operations.
    pub fn prune<F>(&mut self, mut is_drained: F) -> Vec<Graph>
    where
        F: FnMut(&Graph) -> bool,
    {
        let (drained, live): (Vec<Graph>, Vec<Graph>) =
            std::mem::take(&mut self.graphs)
                .into_iter()
                .partition(|g| is_drained(g));

        self.graphs = live;
        if !drained.is_empty() {
            self.rebuild_index();
        }
        drained
    }

    fn rebuild_index(&mut self) {
        self.index_by_snapshot = self
            .graphs
            .iter()
            .enumerate()
            .map(|(idx, g)| (g.snapshot, idx))
            .collect();
    }

    pub fn graphs(&self) -> &[Graph] {
        &self.graphs
    }

    /// The oldest live graph, if any.
    pub fn oldest(&self) -> Option<&Graph> {
        self.graphs.first()
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    pub fn latest_snapshot(&self) -> Option<u64> {
        self.latest_snapshot
    }

    pub fn graph_index_for_snapshot(&self, snapshot: u64) -> Option<usize> {
        self.index_by_snapshot.get(&snapshot).copied()
    }

    pub fn snapshot_for_graph_index(&self, graph_index: usize) -> Option<u64> {
        self.graphs.get(graph_index).map(|g| g.snapshot)
    }
}

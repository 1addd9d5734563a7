// src/graph/readiness.rs

//! Readiness resolution: which pending operations may start right now.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::graph::queue::{Graph, GraphQueue};
use crate::graph::{Operation, OperationId};
use crate::types::{Algorithm, OperationStatus};

/// Live operations keyed by identifier.
pub type OperationTable = HashMap<OperationId, Operation>;

/// A read-only view over the queue for computing readiness.
///
/// The resolver never mutates anything; the dispatcher decides what to do
/// with the ordered result.
pub struct ReadinessResolver<'a> {
    queue: &'a GraphQueue,
    operations: &'a OperationTable,
    /// Finalized operations already pruned from `operations`.
    retired: &'a HashSet<OperationId>,
    algorithm: Algorithm,
}

impl<'a> ReadinessResolver<'a> {
    pub fn new(
        queue: &'a GraphQueue,
        operations: &'a OperationTable,
        retired: &'a HashSet<OperationId>,
        algorithm: Algorithm,
    ) -> Self {
        Self {
            queue,
            operations,
            retired,
            algorithm,
        }
    }

    /// Graphs the algorithm is allowed to draw from, with their graph index.
    fn candidate_graphs(&self) -> impl Iterator<Item = (usize, &'a Graph)> {
        let limit = match self.algorithm {
            Algorithm::CommitGraph => 1,
            Algorithm::FlatGraph => usize::MAX,
        };
        self.queue.graphs().iter().enumerate().take(limit)
    }

    /// Eligible operations, ordered by priority (highest first), then graph
    /// order, then insertion order within the graph.
    pub fn ready_operations(&self, now: DateTime<Utc>) -> Vec<OperationId> {
        let mut ready: Vec<(Reverse<i32>, usize, usize, OperationId)> = Vec::new();

        for (graph_idx, graph) in self.candidate_graphs() {
            for (member_idx, id) in graph.members().iter().enumerate() {
                let Some(op) = self.operations.get(id) else {
                    continue;
                };
                if self.is_ready(op, now) {
                    ready.push((Reverse(op.priority), graph_idx, member_idx, *id));
                }
            }
        }

        ready.sort();
        ready.into_iter().map(|(_, _, _, id)| id).collect()
    }

    /// Whether a single operation is eligible to start at `now`.
    pub fn is_ready(&self, op: &Operation, now: DateTime<Utc>) -> bool {
        if op.status != OperationStatus::Pending {
            return false;
        }
        if !self.in_candidate_graph(op) {
            return false;
        }
        if op.is_held(now) {
            trace!(op = %op.id, hold_until = ?op.hold_until, "operation on hold");
            return false;
        }
        self.unmet_dependencies(op).is_empty()
    }

    fn in_candidate_graph(&self, op: &Operation) -> bool {
        match self.algorithm {
            Algorithm::FlatGraph => true,
            Algorithm::CommitGraph => self
                .queue
                .oldest()
                .is_some_and(|g| g.snapshot() == op.snapshot),
        }
    }

    /// Declared dependencies that still block `op`.
    ///
    /// Under `CommitGraph` only edges within the operation's own graph count;
    /// every member of that graph is in the table, so an unknown identifier
    /// is outside it. Under `FlatGraph` an identifier missing from the table
    /// is satisfied only if it was finalized and pruned; one the pipeline has
    /// never seen may still be appended later and stays unmet.
    pub fn unmet_dependencies(&self, op: &Operation) -> Vec<OperationId> {
        op.dependencies
            .iter()
            .filter(|dep_id| match self.operations.get(dep_id) {
                Some(dep) => {
                    if self.algorithm == Algorithm::CommitGraph && dep.snapshot != op.snapshot {
                        return false;
                    }
                    !dep.status.is_terminal()
                }
                None => self.algorithm == Algorithm::FlatGraph && !self.retired.contains(dep_id),
            })
            .copied()
            .collect()
    }

    /// Pending, unheld operations in considered graphs that wait on at least
    /// one dependency, as `(graph_index, operation, unmet dependencies)`.
    pub fn blocked_operations(
        &self,
        now: DateTime<Utc>,
    ) -> Vec<(usize, &'a Operation, Vec<OperationId>)> {
        self.candidate_graphs()
            .flat_map(|(graph_idx, graph)| graph.members().iter().map(move |id| (graph_idx, id)))
            .filter_map(|(graph_idx, id)| self.operations.get(id).map(|op| (graph_idx, op)))
            .filter(|(_, op)| op.status == OperationStatus::Pending && !op.is_held(now))
            .filter_map(|(graph_idx, op)| {
                let unmet = self.unmet_dependencies(op);
                (!unmet.is_empty()).then_some((graph_idx, op, unmet))
            })
            .collect()
    }

    /// Earliest hold that will expire after `now` among pending operations the
    /// algorithm currently considers.
    pub fn next_hold_deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.candidate_graphs()
            .flat_map(|(_, graph)| graph.members().iter())
            .filter_map(|id| self.operations.get(id))
            .filter(|op| op.status == OperationStatus::Pending)
            .filter_map(|op| op.hold_until)
            .filter(|until| *until > now)
            .min()
    }
}

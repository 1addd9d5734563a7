// src/engine/core.rs

//! Pure pipeline state machine.
//!
//! [`PipelineCore`] owns the graph queue, the operation table, the active set
//! and the suspend count. Every mutation:
//! - validates first, so a rejected call leaves all state untouched
//! - mirrors the change to the [`OperationStore`] before applying it
//! - prunes drained graphs, runs a dispatch pass, and re-derives activity
//! - returns a [`CoreStep`] describing what was dispatched and which events
//!   fired
//!
//! The core has no locks, channels or timers and takes `now` explicitly, so
//! it can be driven deterministically from tests. [`crate::engine::Pipeline`]
//! wraps it for concurrent use.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::commit::RestoredGraph;
use crate::config::DEFAULT_MAX_CONCURRENT_OPERATIONS;
use crate::engine::diagnostics::{BlockedOperation, StallReport};
use crate::engine::step::CoreStep;
use crate::engine::PipelineNames;
use crate::errors::{PipelineError, Result};
use crate::graph::{
    DependencyEdge, Graph, GraphQueue, Operation, OperationId, OperationTable, ReadinessResolver,
};
use crate::store::OperationStore;
use crate::types::{Algorithm, OperationStatus};

pub struct PipelineCore {
    names: PipelineNames,
    algorithm: Algorithm,
    max_concurrent: usize,
    suspend_count: usize,
    queue: GraphQueue,
    operations: OperationTable,
    /// Operations handed out by the dispatcher; bounded by `max_concurrent`.
    active: BTreeSet<OperationId>,
    /// Operations that already used their one `force_active`.
    recovered: HashSet<OperationId>,
    /// Finalized operations whose graph was pruned (or that were finalized
    /// by an earlier process lifetime). Dependencies on them are satisfied.
    retired: HashSet<OperationId>,
    /// Last published value of `is_active`.
    was_active: bool,
    store: Arc<dyn OperationStore>,
}

impl fmt::Debug for PipelineCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineCore")
            .field("name", &self.names.name())
            .field("algorithm", &self.algorithm)
            .field("max_concurrent", &self.max_concurrent)
            .field("suspend_count", &self.suspend_count)
            .field("graphs", &self.queue.len())
            .field("operations", &self.operations.len())
            .field("active", &self.active.len())
            .field("retired", &self.retired.len())
            .finish_non_exhaustive()
    }
}

impl PipelineCore {
    pub fn new(names: PipelineNames, algorithm: Algorithm, store: Arc<dyn OperationStore>) -> Self {
        Self {
            names,
            algorithm,
            max_concurrent: DEFAULT_MAX_CONCURRENT_OPERATIONS,
            suspend_count: 0,
            queue: GraphQueue::new(),
            operations: OperationTable::new(),
            active: BTreeSet::new(),
            recovered: HashSet::new(),
            retired: HashSet::new(),
            was_active: false,
            store,
        }
    }

    // ---------------------------------------------------------------------
    // Identity & configuration
    // ---------------------------------------------------------------------

    pub fn name(&self) -> &str {
        self.names.name()
    }

    pub fn names(&self) -> &PipelineNames {
        &self.names
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn max_concurrent_operation_count(&self) -> usize {
        self.max_concurrent
    }

    /// Change the concurrency limit.
    ///
    /// Lowering it never preempts running operations; new dispatches wait
    /// until the active set falls below the new limit.
    pub fn set_max_concurrent_operation_count(&mut self, max: usize, now: DateTime<Utc>) -> CoreStep {
        if max == self.max_concurrent {
            return CoreStep::default();
        }
        info!(
            pipeline = %self.name(),
            from = self.max_concurrent,
            to = max,
            active = self.active.len(),
            "max concurrent operation count changed"
        );
        self.max_concurrent = max;
        self.finish(now, CoreStep::default())
    }

    // ---------------------------------------------------------------------
    // Graph queue
    // ---------------------------------------------------------------------

    /// Append the operations of a newly committed snapshot.
    ///
    /// Every operation is stamped with this pipeline's name and the snapshot,
    /// and starts `Pending`. An empty batch queues no graph but still
    /// advances the latest known snapshot.
    pub fn append_graph(
        &mut self,
        snapshot: u64,
        operations: Vec<Operation>,
        now: DateTime<Utc>,
    ) -> Result<CoreStep> {
        self.append_graph_with_edges(snapshot, operations, Vec::new(), now)
    }

    /// [`PipelineCore::append_graph`] plus dependency edges supplied by the
    /// commit layer.
    ///
    /// Each edge's `depends_on` must be a member of the new batch. Its
    /// `operation` is either a member too or an already queued, non-terminal
    /// operation: that is how earlier work comes to wait on later-appended
    /// work. One invalid edge rejects the whole append.
    pub fn append_graph_with_edges(
        &mut self,
        snapshot: u64,
        operations: Vec<Operation>,
        dependency_edges: Vec<DependencyEdge>,
        now: DateTime<Utc>,
    ) -> Result<CoreStep> {
        self.queue.check_snapshot(snapshot)?;
        self.check_unique(&operations)?;

        let batch: HashSet<OperationId> = operations.iter().map(|op| op.id).collect();
        let mut onto_queued = Vec::new();
        for edge in dependency_edges.iter() {
            if !batch.contains(&edge.depends_on) {
                return Err(PipelineError::UnknownOperation(edge.depends_on));
            }
            if batch.contains(&edge.operation) {
                continue;
            }
            let status = self.status_of(edge.operation)?;
            if status.is_terminal() {
                return Err(PipelineError::InvalidTransition {
                    id: edge.operation,
                    status,
                    action: "add a dependency to",
                });
            }
            onto_queued.push(*edge);
        }

        let mut operations: Vec<Operation> = operations
            .into_iter()
            .map(|mut op| {
                op.pipeline = self.names.name().to_string();
                op.snapshot = snapshot;
                op.status = OperationStatus::Pending;
                op
            })
            .collect();
        for edge in dependency_edges.iter().filter(|e| batch.contains(&e.operation)) {
            if let Some(op) = operations.iter_mut().find(|op| op.id == edge.operation) {
                op.dependencies.insert(edge.depends_on);
            }
        }

        if !operations.is_empty() {
            self.store.save_graph(snapshot, &operations, &onto_queued)?;
        }

        for edge in onto_queued.iter() {
            if let Some(op) = self.operations.get_mut(&edge.operation) {
                op.dependencies.insert(edge.depends_on);
                debug!(
                    op = %edge.operation,
                    depends_on = %edge.depends_on,
                    snapshot,
                    "queued operation now waits on later-appended work"
                );
            }
        }

        Ok(self.insert_graph(snapshot, operations, now))
    }

    /// Record dependencies that no restored graph can satisfy as retired.
    ///
    /// Finalized operations are deleted from storage, so a dependency that is
    /// neither queued nor among `graphs` was finalized by an earlier process
    /// lifetime. Call once with everything a [`crate::commit::CommitSource`]
    /// returned, before restoring the graphs one by one.
    pub fn retire_unrestored_dependencies(&mut self, graphs: &[RestoredGraph]) {
        let restored: Vec<&Operation> = graphs
            .iter()
            .flat_map(|g| g.operations.iter())
            .filter(|op| self.names.matches(&op.pipeline))
            .collect();
        let known: HashSet<OperationId> = restored
            .iter()
            .map(|op| op.id)
            .chain(self.operations.keys().copied())
            .collect();
        let finished: Vec<OperationId> = restored
            .iter()
            .flat_map(|op| op.dependencies.iter())
            .filter(|dep| !known.contains(*dep))
            .copied()
            .collect();

        if !finished.is_empty() {
            debug!(count = finished.len(), "dependencies finalized by an earlier run");
            self.retired.extend(finished);
        }
    }

    /// Re-queue a graph persisted by an earlier process lifetime.
    ///
    /// Operations tagged with a previous pipeline name are migrated to the
    /// current name; operations belonging to another pipeline are ignored.
    /// Everything restored starts `Pending`; work that is known to still be
    /// running should be re-attached with [`PipelineCore::force_active`].
    pub fn restore_graph(&mut self, graph: RestoredGraph, now: DateTime<Utc>) -> Result<CoreStep> {
        let RestoredGraph {
            snapshot,
            operations,
        } = graph;
        self.queue.check_snapshot(snapshot)?;

        let mut restored = Vec::with_capacity(operations.len());
        for mut op in operations {
            if !self.names.matches(&op.pipeline) {
                warn!(
                    pipeline = %self.name(),
                    op = %op.id,
                    owner = %op.pipeline,
                    "restored operation belongs to another pipeline; ignoring"
                );
                continue;
            }
            if op.pipeline != self.names.name() {
                info!(
                    op = %op.id,
                    from = %op.pipeline,
                    to = %self.name(),
                    "migrating operation from previous pipeline name"
                );
                op.pipeline = self.names.name().to_string();
            }
            op.snapshot = snapshot;
            restored.push(op);
        }
        self.check_unique(&restored)?;

        for op in restored.iter_mut() {
            op.status = OperationStatus::Pending;
        }
        if !restored.is_empty() {
            // Re-save so the store holds the migrated name and reset status,
            // whichever source the graph came from.
            self.store.save_graph(snapshot, &restored, &[])?;
        }

        debug!(snapshot, count = restored.len(), "restoring graph");
        Ok(self.insert_graph(snapshot, restored, now))
    }

    fn check_unique(&self, operations: &[Operation]) -> Result<()> {
        let mut seen = HashSet::with_capacity(operations.len());
        for op in operations {
            if self.operations.contains_key(&op.id) || !seen.insert(op.id) {
                return Err(PipelineError::DuplicateOperation(op.id));
            }
        }
        Ok(())
    }

    fn insert_graph(&mut self, snapshot: u64, operations: Vec<Operation>, now: DateTime<Utc>) -> CoreStep {
        let mut step = CoreStep::default();
        let members: Vec<OperationId> = operations.iter().map(|op| op.id).collect();

        // Only fails on ordering, which both callers have already checked.
        if let Err(err) = self.queue.push(Graph::new(snapshot, members)) {
            warn!(error = %err, snapshot, "graph rejected by queue");
            return step;
        }

        if !operations.is_empty() {
            info!(
                pipeline = %self.name(),
                snapshot,
                count = operations.len(),
                graph_index = ?self.queue.graph_index_for_snapshot(snapshot),
                "appended graph"
            );
            for op in operations {
                self.operations.insert(op.id, op);
            }
            step.events.queue_changed = true;
        }

        self.finish(now, step)
    }

    pub fn graph_count(&self) -> usize {
        self.queue.len()
    }

    pub fn latest_snapshot(&self) -> Option<u64> {
        self.queue.latest_snapshot()
    }

    pub fn graph_index_for_snapshot(&self, snapshot: u64) -> Option<usize> {
        self.queue.graph_index_for_snapshot(snapshot)
    }

    pub fn snapshot_for_graph_index(&self, graph_index: usize) -> Option<u64> {
        self.queue.snapshot_for_graph_index(graph_index)
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn find_operation(&self, id: OperationId) -> Option<&Operation> {
        self.operations.get(&id)
    }

    fn get(&self, id: OperationId) -> Result<&Operation> {
        self.operations
            .get(&id)
            .ok_or(PipelineError::UnknownOperation(id))
    }

    pub fn status_of(&self, id: OperationId) -> Result<OperationStatus> {
        self.get(id).map(|op| op.status)
    }

    pub fn hold_until(&self, id: OperationId) -> Result<Option<DateTime<Utc>>> {
        self.get(id).map(|op| op.hold_until)
    }

    /// Operations currently `Active` (dispatched or recovered), in queue
    /// order.
    pub fn active_operations(&self) -> Vec<Operation> {
        self.iter_queue()
            .filter(|(op, _)| op.status == OperationStatus::Active)
            .map(|(op, _)| op.clone())
            .collect()
    }

    /// Number of operations handed out by the dispatcher.
    pub fn dispatched_count(&self) -> usize {
        self.active.len()
    }

    /// Visit every live operation in queue order with its graph index until
    /// the callback breaks.
    pub fn enumerate_operations<F>(&self, mut f: F)
    where
        F: FnMut(&Operation, usize) -> ControlFlow<()>,
    {
        for (op, graph_index) in self.iter_queue() {
            if f(op, graph_index).is_break() {
                break;
            }
        }
    }

    fn iter_queue(&self) -> impl Iterator<Item = (&Operation, usize)> {
        self.queue
            .graphs()
            .iter()
            .enumerate()
            .flat_map(|(idx, g)| g.members().iter().map(move |id| (id, idx)))
            .filter_map(|(id, idx)| self.operations.get(id).map(|op| (op, idx)))
    }

    /// Eligible operations at `now`, in dispatch order. Ignores suspension
    /// and free slots.
    pub fn ready_operations(&self, now: DateTime<Utc>) -> Vec<OperationId> {
        self.resolver().ready_operations(now)
    }

    /// When the earliest pending hold expires, if any is still in the future.
    pub fn next_hold_deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.resolver().next_hold_deadline(now)
    }

    fn resolver(&self) -> ReadinessResolver<'_> {
        ReadinessResolver::new(&self.queue, &self.operations, &self.retired, self.algorithm)
    }

    /// Whether `id` reached `Completed` or `Skipped`, whether or not its
    /// graph has been pruned since.
    pub fn is_finalized(&self, id: OperationId) -> bool {
        self.retired.contains(&id)
            || self
                .operations
                .get(&id)
                .is_some_and(|op| op.status.is_terminal())
    }

    fn pending_count(&self) -> usize {
        self.operations
            .values()
            .filter(|op| op.status == OperationStatus::Pending)
            .count()
    }

    /// Describe a stalled pipeline.
    ///
    /// Returns `Some` only when pending work exists, the pipeline is not
    /// suspended, nothing is active, no hold is pending and nothing is ready:
    /// the only way out is a state change from outside (typically the
    /// dependency set contains a cycle or waits on an operation that was never
    /// appended).
    pub fn stall_report(&self, now: DateTime<Utc>) -> Option<StallReport> {
        let pending = self.pending_count();
        if pending == 0 || self.suspend_count > 0 || self.has_active() {
            return None;
        }
        let resolver = self.resolver();
        if !resolver.ready_operations(now).is_empty() || resolver.next_hold_deadline(now).is_some() {
            return None;
        }

        let blocked: Vec<BlockedOperation> = resolver
            .blocked_operations(now)
            .into_iter()
            .map(|(graph_index, op, unmet)| BlockedOperation {
                id: op.id,
                snapshot: op.snapshot,
                graph_index,
                unmet_dependencies: unmet,
            })
            .collect();

        warn!(
            pipeline = %self.name(),
            pending,
            blocked = blocked.len(),
            "pipeline stalled on dependencies"
        );
        Some(StallReport { pending, blocked })
    }

    // ---------------------------------------------------------------------
    // State machine
    // ---------------------------------------------------------------------

    /// `Active -> Completed`. Finalizes the operation and deletes its
    /// durable record.
    pub fn complete_operation(&mut self, id: OperationId, now: DateTime<Utc>) -> Result<CoreStep> {
        let status = self.status_of(id)?;
        if status != OperationStatus::Active {
            return Err(PipelineError::InvalidTransition {
                id,
                status,
                action: "complete",
            });
        }
        self.finalize(id, OperationStatus::Completed, now)
    }

    /// `Active|Pending -> Skipped`. Finalizes the operation and deletes its
    /// durable record.
    pub fn skip_operation(&mut self, id: OperationId, now: DateTime<Utc>) -> Result<CoreStep> {
        let status = self.status_of(id)?;
        if status.is_terminal() {
            return Err(PipelineError::InvalidTransition {
                id,
                status,
                action: "skip",
            });
        }
        self.finalize(id, OperationStatus::Skipped, now)
    }

    fn finalize(&mut self, id: OperationId, status: OperationStatus, now: DateTime<Utc>) -> Result<CoreStep> {
        self.store.delete_operation(id)?;

        let mut step = CoreStep::default();
        if let Some(op) = self.operations.get_mut(&id) {
            op.status = status;
            debug!(op = %id, snapshot = op.snapshot, %status, "operation finalized");
        }
        self.active.remove(&id);
        step.events.queue_changed = true;

        Ok(self.finish(now, step))
    }

    /// `Active -> Pending`, optionally holding the operation for
    /// `retry_delay` before it can be dispatched again.
    pub fn reset_to_pending(
        &mut self,
        id: OperationId,
        retry_delay: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<CoreStep> {
        let status = self.status_of(id)?;
        if status != OperationStatus::Active {
            return Err(PipelineError::InvalidTransition {
                id,
                status,
                action: "reset to pending",
            });
        }

        let hold = retry_delay.map(|delay| {
            let delta = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
            now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
        });

        match hold {
            Some(hold) => self
                .store
                .update_status_and_hold(id, OperationStatus::Pending, Some(hold))?,
            None => self.store.update_status(id, OperationStatus::Pending)?,
        }

        if let Some(op) = self.operations.get_mut(&id) {
            op.status = OperationStatus::Pending;
            if hold.is_some() {
                op.hold_until = hold;
            }
        }
        self.active.remove(&id);
        debug!(op = %id, hold_until = ?hold, "operation reset to pending");

        let mut step = CoreStep::default();
        step.events.queue_changed = true;
        Ok(self.finish(now, step))
    }

    /// `Pending -> Active` without dispatching, for work that was already
    /// started by an earlier process lifetime.
    ///
    /// Allowed once per operation. The operation does not count against the
    /// concurrency limit and the worker is not asked to start it.
    pub fn force_active(&mut self, id: OperationId, now: DateTime<Utc>) -> Result<CoreStep> {
        let status = self.status_of(id)?;
        if status != OperationStatus::Pending || self.recovered.contains(&id) {
            return Err(PipelineError::InvalidTransition {
                id,
                status,
                action: "force active",
            });
        }

        self.store.update_status(id, OperationStatus::Active)?;

        if let Some(op) = self.operations.get_mut(&id) {
            op.status = OperationStatus::Active;
        }
        self.recovered.insert(id);
        info!(op = %id, "operation recovered as already active");

        let mut step = CoreStep::default();
        step.events.queue_changed = true;
        Ok(self.finish(now, step))
    }

    /// Set or clear the hold on an operation, whatever its status.
    pub fn set_hold(
        &mut self,
        id: OperationId,
        hold_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<CoreStep> {
        let current = self.hold_until(id)?;
        if current == hold_until {
            return Ok(CoreStep::default());
        }

        self.store.update_hold(id, hold_until)?;
        if let Some(op) = self.operations.get_mut(&id) {
            op.hold_until = hold_until;
        }
        debug!(op = %id, ?hold_until, "operation hold changed");

        let mut step = CoreStep::default();
        step.events.queue_changed = true;
        Ok(self.finish(now, step))
    }

    // ---------------------------------------------------------------------
    // Suspend & resume
    // ---------------------------------------------------------------------

    pub fn suspend_count(&self) -> usize {
        self.suspend_count
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend_count > 0
    }

    /// Increment the suspend count by `increment`, returning the new count.
    /// An increment of zero only reports the current count.
    pub fn suspend_by(&mut self, increment: usize, now: DateTime<Utc>) -> (usize, CoreStep) {
        if increment == 0 {
            return (self.suspend_count, CoreStep::default());
        }
        self.suspend_count = self.suspend_count.saturating_add(increment);
        info!(pipeline = %self.name(), suspend_count = self.suspend_count, "pipeline suspended");

        let mut step = CoreStep::default();
        step.events.suspend_count_changed = true;
        (self.suspend_count, self.finish(now, step))
    }

    /// Decrement the suspend count (never below zero), returning the new
    /// count. Reaching zero immediately runs a dispatch pass.
    pub fn resume(&mut self, now: DateTime<Utc>) -> (usize, CoreStep) {
        if self.suspend_count == 0 {
            debug!(pipeline = %self.name(), "resume called on a running pipeline; ignoring");
            return (0, CoreStep::default());
        }
        self.suspend_count -= 1;
        info!(pipeline = %self.name(), suspend_count = self.suspend_count, "pipeline resumed");

        let mut step = CoreStep::default();
        step.events.suspend_count_changed = true;
        (self.suspend_count, self.finish(now, step))
    }

    // ---------------------------------------------------------------------
    // Dispatch & activity
    // ---------------------------------------------------------------------

    /// Run a dispatch pass without any other change (e.g. a hold expired).
    /// A no-op when nothing became ready.
    pub fn dispatch(&mut self, now: DateTime<Utc>) -> CoreStep {
        self.finish(now, CoreStep::default())
    }

    /// `is_active`: something is running, or there is pending work and the
    /// pipeline is not suspended.
    pub fn is_active(&self) -> bool {
        self.has_active() || (self.suspend_count == 0 && self.pending_count() > 0)
    }

    fn has_active(&self) -> bool {
        !self.active.is_empty()
            || self
                .operations
                .values()
                .any(|op| op.status == OperationStatus::Active)
    }

    /// Common tail of every mutation: prune, dispatch, derive activity.
    fn finish(&mut self, now: DateTime<Utc>, mut step: CoreStep) -> CoreStep {
        self.prune_drained_graphs(&mut step);
        self.dispatch_ready(now, &mut step);
        self.refresh_activity(&mut step);
        step
    }

    /// Remove every graph whose members are all terminal, wherever it sits in
    /// the queue.
    fn prune_drained_graphs(&mut self, step: &mut CoreStep) {
        let operations = &self.operations;
        let drained = self.queue.prune(|graph| {
            graph
                .members()
                .iter()
                .all(|id| operations.get(id).is_none_or(|op| op.status.is_terminal()))
        });

        if drained.is_empty() {
            return;
        }

        for graph in drained.iter() {
            for id in graph.members() {
                self.operations.remove(id);
                self.recovered.remove(id);
                self.retired.insert(*id);
            }
            info!(
                pipeline = %self.names.name(),
                snapshot = graph.snapshot(),
                "graph drained; removed from queue"
            );
        }
        step.events.queue_changed = true;
    }

    /// Move ready operations to `Active` while slots are free and the
    /// pipeline is not suspended.
    fn dispatch_ready(&mut self, now: DateTime<Utc>, step: &mut CoreStep) {
        if self.suspend_count > 0 {
            return;
        }
        let free = self.max_concurrent.saturating_sub(self.active.len());
        if free == 0 {
            return;
        }

        // Starting an operation never makes another one ready, so a single
        // resolver pass is enough.
        let ready = self.resolver().ready_operations(now);

        let mut started = 0;
        for id in ready {
            if started == free {
                break;
            }
            // A failed write costs no slot; the next ready operation gets it.
            if let Err(err) = self.store.update_status(id, OperationStatus::Active) {
                warn!(op = %id, error = %err, "failed to persist dispatch; leaving operation pending");
                continue;
            }
            let Some(op) = self.operations.get_mut(&id) else {
                continue;
            };
            op.status = OperationStatus::Active;
            self.active.insert(id);
            started += 1;

            info!(
                pipeline = %self.names.name(),
                op = %id,
                snapshot = op.snapshot,
                priority = op.priority,
                active = self.active.len(),
                "dispatching operation"
            );
            step.dispatched.push(op.clone());
            step.events.queue_changed = true;
        }
    }

    fn refresh_activity(&mut self, step: &mut CoreStep) {
        let is_active = self.is_active();
        if is_active != self.was_active {
            debug!(pipeline = %self.name(), is_active, "activity changed");
            self.was_active = is_active;
            step.events.active_status_changed = true;
        }
    }
}

// src/engine/pipeline.rs

use std::collections::BTreeSet;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::commit::CommitSource;
use crate::config::DEFAULT_MAX_CONCURRENT_OPERATIONS;
use crate::engine::core::PipelineCore;
use crate::engine::diagnostics::StallReport;
use crate::engine::events::EventPublisher;
use crate::engine::step::CoreStep;
use crate::engine::timer::spawn_hold_timer;
use crate::engine::{PipelineEvent, PipelineNames};
use crate::errors::Result;
use crate::exec::{spawn_dispatcher, Worker};
use crate::graph::{DependencyEdge, Operation, OperationId};
use crate::store::{MemoryStore, OperationStore};
use crate::types::{Algorithm, OperationStatus};

struct Shared {
    core: Mutex<PipelineCore>,
    dispatch_tx: mpsc::UnboundedSender<Operation>,
    timer_tx: mpsc::UnboundedSender<()>,
    events: EventPublisher,
}

/// Thread-safe handle to a pipeline.
///
/// Cloning is cheap; all clones share one [`PipelineCore`] behind a single
/// mutex. Each method takes the lock once, performs a bounded synchronous
/// change and releases it. Operations chosen by the dispatcher are handed to
/// the [`Worker`] from a separate task after the lock is released, so a
/// worker may call back into the pipeline (even from inside
/// `start_operation`) without deadlocking.
#[derive(Clone)]
pub struct Pipeline {
    shared: Arc<Shared>,
}

/// Non-owning pipeline reference held by background tasks.
#[derive(Clone)]
pub struct WeakPipeline(Weak<Shared>);

impl WeakPipeline {
    pub fn upgrade(&self) -> Option<Pipeline> {
        self.0.upgrade().map(|shared| Pipeline { shared })
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("core", &*self.shared.core.lock())
            .finish_non_exhaustive()
    }
}

/// Configures and starts a [`Pipeline`].
///
/// Name, algorithm and previous names are fixed once the pipeline is built.
pub struct PipelineBuilder {
    name: String,
    algorithm: Algorithm,
    previous_names: BTreeSet<String>,
    max_concurrent: usize,
    suspend_count: usize,
    store: Option<Arc<dyn OperationStore>>,
    source: Option<Arc<dyn CommitSource>>,
    event_capacity: usize,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            algorithm: Algorithm::default(),
            previous_names: BTreeSet::new(),
            max_concurrent: DEFAULT_MAX_CONCURRENT_OPERATIONS,
            suspend_count: 0,
            store: None,
            source: None,
            event_capacity: 64,
        }
    }

    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Names the pipeline was registered under before a rename.
    pub fn previous_names(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.previous_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_concurrent_operation_count(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Start with the given suspend count (0 = running).
    pub fn suspended(mut self, suspend_count: usize) -> Self {
        self.suspend_count = suspend_count;
        self
    }

    /// Storage mirror. Defaults to a fresh [`MemoryStore`].
    pub fn store(mut self, store: Arc<dyn OperationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Re-queue persisted graphs from `source` when the pipeline starts.
    pub fn restore_from(mut self, source: Arc<dyn CommitSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Build the pipeline and start its dispatcher and hold-timer tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self, worker: Arc<dyn Worker>) -> Result<Pipeline> {
        let names = PipelineNames::new(self.name, self.previous_names);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn OperationStore>);

        let now = Utc::now();
        let mut core = PipelineCore::new(names.clone(), self.algorithm, store);
        core.set_max_concurrent_operation_count(self.max_concurrent, now);
        if self.suspend_count > 0 {
            core.suspend_by(self.suspend_count, now);
        }

        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        let pipeline = Pipeline {
            shared: Arc::new(Shared {
                core: Mutex::new(core),
                dispatch_tx,
                timer_tx,
                events: EventPublisher::new(self.event_capacity),
            }),
        };

        spawn_dispatcher(pipeline.downgrade(), dispatch_rx, worker);
        spawn_hold_timer(pipeline.downgrade(), timer_rx);

        info!(
            pipeline = %names.name(),
            algorithm = %self.algorithm,
            previous_names = ?names.previous(),
            max_concurrent = self.max_concurrent,
            "pipeline started"
        );

        if let Some(source) = self.source {
            pipeline.restore(source.as_ref())?;
        }

        Ok(pipeline)
    }
}

impl Pipeline {
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    pub fn downgrade(&self) -> WeakPipeline {
        WeakPipeline(Arc::downgrade(&self.shared))
    }

    /// Lock the core, run `f`, then hand out dispatched operations and
    /// publish events with the lock released.
    fn mutate<T>(&self, f: impl FnOnce(&mut PipelineCore, DateTime<Utc>) -> Result<(T, CoreStep)>) -> Result<T> {
        let (value, step) = {
            let mut core = self.shared.core.lock();
            f(&mut core, Utc::now())?
        };
        self.apply(step);
        Ok(value)
    }

    /// [`Pipeline::mutate`] for core calls that cannot fail.
    fn mutate_infallible<T>(&self, f: impl FnOnce(&mut PipelineCore, DateTime<Utc>) -> (T, CoreStep)) -> T {
        let (value, step) = {
            let mut core = self.shared.core.lock();
            f(&mut core, Utc::now())
        };
        self.apply(step);
        value
    }

    fn read<T>(&self, f: impl FnOnce(&PipelineCore) -> T) -> T {
        f(&self.shared.core.lock())
    }

    fn apply(&self, step: CoreStep) {
        for op in step.dispatched {
            let id = op.id();
            if self.shared.dispatch_tx.send(op).is_err() {
                warn!(op = %id, "dispatcher is gone; operation stays active until reset");
            }
        }
        if !step.events.is_empty() {
            // Any change may move the earliest hold.
            let _ = self.shared.timer_tx.send(());
        }
        self.shared.events.publish(step.events);
    }

    fn restore(&self, source: &dyn CommitSource) -> Result<()> {
        let names = self.read(|core| core.names().clone());
        let graphs = source.restore_graphs(&names)?;
        let count = graphs.len();
        self.shared.core.lock().retire_unrestored_dependencies(&graphs);
        for graph in graphs {
            self.mutate(|core, now| Ok(((), core.restore_graph(graph, now)?)))?;
        }
        debug!(pipeline = %names.name(), graphs = count, "restore complete");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Identity & configuration
    // ---------------------------------------------------------------------

    pub fn name(&self) -> String {
        self.read(|core| core.name().to_string())
    }

    pub fn algorithm(&self) -> Algorithm {
        self.read(|core| core.algorithm())
    }

    pub fn previous_names(&self) -> BTreeSet<String> {
        self.read(|core| core.names().previous().clone())
    }

    pub fn max_concurrent_operation_count(&self) -> usize {
        self.read(|core| core.max_concurrent_operation_count())
    }

    pub fn set_max_concurrent_operation_count(&self, max: usize) {
        self.mutate_infallible(|core, now| ((), core.set_max_concurrent_operation_count(max, now)));
    }

    // ---------------------------------------------------------------------
    // Commit layer
    // ---------------------------------------------------------------------

    /// Append the operations produced by commit `snapshot`.
    ///
    /// Fails with `OrderingViolation` if `snapshot` is not greater than every
    /// snapshot appended before, and with `DuplicateOperation` if an
    /// identifier is already queued. Nothing is applied on failure.
    pub fn append_graph(&self, snapshot: u64, operations: Vec<Operation>) -> Result<()> {
        self.mutate(|core, now| Ok(((), core.append_graph(snapshot, operations, now)?)))
    }

    /// [`Pipeline::append_graph`] plus dependency edges from already queued
    /// operations (or from members of the batch) onto the new batch.
    ///
    /// Fails with `UnknownOperation` if an edge names an operation that is
    /// neither in the batch nor queued, and with `InvalidTransition` if the
    /// dependent operation is already finalized. Nothing is applied on
    /// failure.
    pub fn append_graph_with_edges(
        &self,
        snapshot: u64,
        operations: Vec<Operation>,
        dependency_edges: Vec<DependencyEdge>,
    ) -> Result<()> {
        self.mutate(|core, now| {
            Ok(((), core.append_graph_with_edges(snapshot, operations, dependency_edges, now)?))
        })
    }

    /// Finalize an active operation as completed.
    pub fn complete_operation(&self, id: OperationId) -> Result<()> {
        self.mutate(|core, now| Ok(((), core.complete_operation(id, now)?)))
    }

    /// Finalize a pending or active operation as skipped.
    pub fn skip_operation(&self, id: OperationId) -> Result<()> {
        self.mutate(|core, now| Ok(((), core.skip_operation(id, now)?)))
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// Copy of the operation, or `None` once it is unknown or pruned.
    pub fn find_operation(&self, id: OperationId) -> Option<Operation> {
        self.read(|core| core.find_operation(id).cloned())
    }

    pub fn active_operations(&self) -> Vec<Operation> {
        self.read(|core| core.active_operations())
    }

    /// Visit queued operations (oldest graph first) with their graph index.
    ///
    /// The callback runs on a copy taken under the lock, so it may call back
    /// into the pipeline.
    pub fn enumerate_operations<F>(&self, mut f: F)
    where
        F: FnMut(&Operation, usize) -> ControlFlow<()>,
    {
        let snapshot = self.read(|core| {
            let mut ops = Vec::new();
            core.enumerate_operations(|op, idx| {
                ops.push((op.clone(), idx));
                ControlFlow::Continue(())
            });
            ops
        });
        for (op, graph_index) in snapshot.iter() {
            if f(op, *graph_index).is_break() {
                break;
            }
        }
    }

    pub fn graph_count(&self) -> usize {
        self.read(|core| core.graph_count())
    }

    pub fn snapshot_for_graph_index(&self, graph_index: usize) -> Option<u64> {
        self.read(|core| core.snapshot_for_graph_index(graph_index))
    }

    pub fn graph_index_for_snapshot(&self, snapshot: u64) -> Option<usize> {
        self.read(|core| core.graph_index_for_snapshot(snapshot))
    }

    pub fn latest_snapshot(&self) -> Option<u64> {
        self.read(|core| core.latest_snapshot())
    }

    /// Report a dependency stall, if the pipeline is in one right now.
    pub fn stall_report(&self) -> Option<StallReport> {
        self.read(|core| core.stall_report(Utc::now()))
    }

    pub fn next_hold_deadline(&self) -> Option<DateTime<Utc>> {
        self.read(|core| core.next_hold_deadline(Utc::now()))
    }

    // ---------------------------------------------------------------------
    // Status
    // ---------------------------------------------------------------------

    pub fn status_of(&self, id: OperationId) -> Result<OperationStatus> {
        self.read(|core| core.status_of(id))
    }

    /// Mark an operation as already running (recovery after relaunch).
    ///
    /// The worker is not called and the operation does not use a
    /// concurrency slot; the caller tracks it.
    pub fn force_active(&self, id: OperationId) -> Result<()> {
        self.mutate(|core, now| Ok(((), core.force_active(id, now)?)))
    }

    /// Give a failed operation back to the pipeline, optionally holding it
    /// for `retry_delay`.
    pub fn reset_to_pending(&self, id: OperationId, retry_delay: Option<Duration>) -> Result<()> {
        self.mutate(|core, now| Ok(((), core.reset_to_pending(id, retry_delay, now)?)))
    }

    // ---------------------------------------------------------------------
    // Hold
    // ---------------------------------------------------------------------

    pub fn hold_until(&self, id: OperationId) -> Result<Option<DateTime<Utc>>> {
        self.read(|core| core.hold_until(id))
    }

    /// Set (or clear, with `None`) the hold on an operation.
    pub fn set_hold(&self, id: OperationId, hold_until: Option<DateTime<Utc>>) -> Result<()> {
        self.mutate(|core, now| Ok(((), core.set_hold(id, hold_until, now)?)))
    }

    // ---------------------------------------------------------------------
    // Suspend & resume
    // ---------------------------------------------------------------------

    /// Increment the suspend count; returns the new count.
    pub fn suspend(&self) -> usize {
        self.suspend_by(1)
    }

    /// Increment the suspend count by `increment`; returns the new count.
    pub fn suspend_by(&self, increment: usize) -> usize {
        self.mutate_infallible(|core, now| core.suspend_by(increment, now))
    }

    /// Decrement the suspend count; returns the new count.
    pub fn resume(&self) -> usize {
        self.mutate_infallible(|core, now| core.resume(now))
    }

    pub fn suspend_count(&self) -> usize {
        self.read(|core| core.suspend_count())
    }

    pub fn is_suspended(&self) -> bool {
        self.read(|core| core.is_suspended())
    }

    // ---------------------------------------------------------------------
    // Activity & events
    // ---------------------------------------------------------------------

    pub fn is_active(&self) -> bool {
        self.read(|core| core.is_active())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.shared.events.subscribe()
    }

    /// Run a dispatch pass now. Normally driven by mutations and the hold
    /// timer.
    pub fn dispatch_pass(&self) {
        self.mutate_infallible(|core, now| ((), core.dispatch(now)));
    }

    /// Wait until every graph has drained and nothing is active.
    pub async fn wait_until_drained(&self) {
        let mut events = self.subscribe();
        loop {
            if self.read(|core| core.graph_count() == 0 && !core.is_active()) {
                return;
            }
            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

// src/engine/step.rs

//! Result types for a single core mutation.

use crate::engine::PipelineEvent;
use crate::graph::Operation;

/// Coalesced set of events raised during one mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventSet {
    pub queue_changed: bool,
    pub suspend_count_changed: bool,
    pub active_status_changed: bool,
}

impl EventSet {
    pub fn is_empty(&self) -> bool {
        !(self.queue_changed || self.suspend_count_changed || self.active_status_changed)
    }

    pub fn contains(&self, event: PipelineEvent) -> bool {
        match event {
            PipelineEvent::QueueChanged => self.queue_changed,
            PipelineEvent::SuspendCountChanged => self.suspend_count_changed,
            PipelineEvent::ActiveStatusChanged => self.active_status_changed,
        }
    }

    /// Events in publication order, at most one per kind.
    pub fn events(&self) -> Vec<PipelineEvent> {
        [
            PipelineEvent::QueueChanged,
            PipelineEvent::SuspendCountChanged,
            PipelineEvent::ActiveStatusChanged,
        ]
        .into_iter()
        .filter(|e| self.contains(*e))
        .collect()
    }
}

/// Structured result of one core mutation.
///
/// The pipeline handle uses it to hand operations to the worker and publish
/// events once the lock is released; tests use it to assert exactly what a
/// single call changed.
#[derive(Debug, Clone, Default)]
pub struct CoreStep {
    /// Operations moved `Pending -> Active` by the dispatcher in this step,
    /// in dispatch order.
    pub dispatched: Vec<Operation>,
    pub events: EventSet,
}

impl CoreStep {
    pub fn dispatched_ids(&self) -> Vec<crate::graph::OperationId> {
        self.dispatched.iter().map(|op| op.id()).collect()
    }
}

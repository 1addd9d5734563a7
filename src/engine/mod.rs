// src/engine/mod.rs

//! Pipeline engine.
//!
//! This module ties together:
//! - the graph queue and readiness resolver
//! - the operation state machine and the concurrency-limited dispatcher
//! - suspend/resume gating and activity derivation
//! - change notifications for subscribers
//!
//! The pure, synchronous state machine lives in [`core`]; the thread-safe
//! handle that owns it, hands operations to the worker and runs the hold
//! timer lives in [`pipeline`].

use std::collections::BTreeSet;

pub mod core;
pub mod diagnostics;
pub mod events;
pub mod pipeline;
pub mod step;
pub mod timer;

pub use self::core::PipelineCore;
pub use diagnostics::{BlockedOperation, StallReport};
pub use events::EventPublisher;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use step::{CoreStep, EventSet};

/// Change notification published by a pipeline.
///
/// Events carry no payload: they mean "something changed, re-query state".
/// Several changes made by one call are coalesced into a single event per
/// kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineEvent {
    /// Operations were added, removed or modified.
    QueueChanged,
    /// `suspend_count` changed.
    SuspendCountChanged,
    /// `is_active` flipped.
    ActiveStatusChanged,
}

/// A pipeline's current name plus the names it was previously registered
/// under.
///
/// Operations persisted under a previous name are re-attached to the
/// pipeline (and re-tagged with the current name) when restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineNames {
    name: String,
    previous: BTreeSet<String>,
}

impl PipelineNames {
    pub fn new(name: impl Into<String>, previous: impl IntoIterator<Item = String>) -> Self {
        let name = name.into();
        let previous = previous.into_iter().filter(|p| *p != name).collect();
        Self { name, previous }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn previous(&self) -> &BTreeSet<String> {
        &self.previous
    }

    /// Whether an operation tagged `pipeline` belongs here.
    pub fn matches(&self, pipeline: &str) -> bool {
        self.name == pipeline || self.previous.contains(pipeline)
    }
}

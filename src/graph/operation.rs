// src/graph/operation.rs

//! Operation records: identity, status, dependencies, priority and hold.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::OperationStatus;

/// Opaque, immutable identifier of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Allocate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// An edge supplied by the commit layer alongside a new graph: `operation`
/// must not start until `depends_on` is terminal.
///
/// `depends_on` is always a member of the graph being appended; `operation`
/// is either in that graph too or already queued, which is how earlier work
/// comes to wait on later-appended work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
    pub operation: OperationId,
    pub depends_on: OperationId,
}

impl DependencyEdge {
    pub fn new(operation: OperationId, depends_on: OperationId) -> Self {
        Self {
            operation,
            depends_on,
        }
    }
}

/// A single unit of outbound work.
///
/// Callers build operations with [`Operation::new`] and the `with_*`
/// helpers, then hand them to the pipeline as part of a graph. The pipeline
/// stamps the owning pipeline name and the graph snapshot on append; from
/// then on identity and snapshot never change.
///
/// The payload is opaque to the scheduler and is carried through for the
/// worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub(crate) id: OperationId,
    pub(crate) pipeline: String,
    pub(crate) snapshot: u64,
    pub(crate) status: OperationStatus,
    pub(crate) dependencies: BTreeSet<OperationId>,
    pub(crate) priority: i32,
    pub(crate) hold_until: Option<DateTime<Utc>>,
    pub(crate) payload: serde_json::Value,
}

impl Operation {
    pub fn new() -> Self {
        Self::with_id(OperationId::new())
    }

    /// Build an operation with a known identifier (e.g. one restored from
    /// storage).
    pub fn with_id(id: OperationId) -> Self {
        Self {
            id,
            pipeline: String::new(),
            snapshot: 0,
            status: OperationStatus::Pending,
            dependencies: BTreeSet::new(),
            priority: 0,
            hold_until: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, dependency: OperationId) -> Self {
        self.dependencies.insert(dependency);
        self
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = OperationId>) -> Self {
        self.dependencies.extend(deps);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_hold_until(mut self, hold_until: Option<DateTime<Utc>>) -> Self {
        self.hold_until = hold_until;
        self
    }

    /// Tag the operation with the pipeline it was persisted under.
    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = pipeline.into();
        self
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Snapshot of the commit that produced this operation.
    pub fn snapshot(&self) -> u64 {
        self.snapshot
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    pub fn dependencies(&self) -> &BTreeSet<OperationId> {
        &self.dependencies
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn hold_until(&self) -> Option<DateTime<Utc>> {
        self.hold_until
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Whether a hold keeps this operation from starting at `now`.
    pub fn is_held(&self, now: DateTime<Utc>) -> bool {
        matches!(self.hold_until, Some(until) if now < until)
    }
}

impl Default for Operation {
    fn default() -> Self {
        Self::new()
    }
}

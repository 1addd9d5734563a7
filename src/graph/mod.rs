// src/graph/mod.rs

//! Queue model and readiness resolution.
//!
//! - [`operation`] holds the operation record and its identifier.
//! - [`queue`] holds the commit graphs and the snapshot/graph-index mapping.
//! - [`readiness`] decides which pending operations may start, for either
//!   algorithm.

pub mod operation;
pub mod queue;
pub mod readiness;

pub use operation::{DependencyEdge, Operation, OperationId};
pub use queue::{Graph, GraphQueue};
pub use readiness::{OperationTable, ReadinessResolver};

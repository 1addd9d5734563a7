// src/commit/mod.rs

//! Commit-layer collaborator.
//!
//! The commit layer decides which operations belong to a commit and what
//! edges exist between them. Live commits are pushed into the pipeline with
//! `Pipeline::append_graph`; graphs persisted by an earlier process lifetime
//! are pulled once at start-up through [`CommitSource`].
//!
//! - [`plan`] provides a `CommitSource` backed by a TOML plan file.

pub mod plan;

use crate::engine::PipelineNames;
use crate::errors::Result;
use crate::graph::Operation;

pub use plan::PlanSource;

/// Operations of one commit recovered from storage.
#[derive(Debug, Clone)]
pub struct RestoredGraph {
    pub snapshot: u64,
    /// Operations in their original insertion order.
    pub operations: Vec<Operation>,
}

/// Supplies graphs that must be re-queued when a pipeline starts.
pub trait CommitSource: Send + Sync {
    /// Graphs belonging to the pipeline (under its current or any previous
    /// name), oldest snapshot first.
    fn restore_graphs(&self, names: &PipelineNames) -> Result<Vec<RestoredGraph>>;
}

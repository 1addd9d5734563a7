// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Strategy used to decide which queued operations may start.
///
/// - `CommitGraph`: graphs execute one at a time, in commit order. Only the
///   oldest live graph is ever considered, so you only have to reason about
///   dependencies within a single commit (default).
/// - `FlatGraph`: every live graph is considered at once. Ordering between
///   commits comes purely from declared dependencies, so the commit layer must
///   supply a complete dependency graph across commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    CommitGraph,
    FlatGraph,
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "commit_graph" | "commit" => Ok(Algorithm::CommitGraph),
            "flat_graph" | "flat" => Ok(Algorithm::FlatGraph),
            other => Err(format!(
                "invalid algorithm: {other} (expected \"commit_graph\" or \"flat_graph\")"
            )),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::CommitGraph => f.write_str("commit_graph"),
            Algorithm::FlatGraph => f.write_str("flat_graph"),
        }
    }
}

/// Lifecycle status of a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Queued; may be handed to the worker once ready.
    #[default]
    Pending,
    /// Handed to the worker (or recovered as already running).
    Active,
    /// Finalized successfully by the commit layer.
    Completed,
    /// Finalized without running (or abandoned) by the commit layer.
    Skipped,
}

impl OperationStatus {
    /// `Completed` and `Skipped` are terminal: dependents may proceed and the
    /// owning graph may drain.
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Skipped)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Active => "active",
            OperationStatus::Completed => "completed",
            OperationStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::graph::OperationId;
use crate::types::OperationStatus;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unknown operation: {0}")]
    UnknownOperation(OperationId),

    #[error("Invalid transition: cannot {action} operation {id} while {status}")]
    InvalidTransition {
        id: OperationId,
        status: OperationStatus,
        action: &'static str,
    },

    #[error("Ordering violation: snapshot {snapshot} is not greater than latest snapshot {latest}")]
    OrderingViolation { snapshot: u64, latest: u64 },

    #[error("Duplicate operation: {0}")]
    DuplicateOperation(OperationId),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipelineError>;

// src/config/mod.rs

//! Configuration loading and validation for syncpipe.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a plan file from disk (`loader.rs`).
//! - Validate snapshot order and the operation dependency graph
//!   (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, parse_and_validate};
pub use model::{
    ConfigFile, GraphConfig, OperationConfig, PipelineSection, RawConfigFile, WorkerSection,
    DEFAULT_MAX_CONCURRENT_OPERATIONS,
};

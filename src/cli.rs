// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::Algorithm;

/// Command-line arguments for `syncpipe`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "syncpipe",
    version,
    about = "Replay commit graphs through a dependency-aware sync pipeline.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the plan file (TOML).
    ///
    /// Default: `Syncpipe.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Syncpipe.toml")]
    pub config: String,

    /// Override `[pipeline].algorithm` (`commit_graph`/`commit` or
    /// `flat_graph`/`flat`).
    #[arg(long, value_name = "ALGORITHM")]
    pub algorithm: Option<Algorithm>,

    /// Override `[pipeline].max_concurrent_operation_count`.
    #[arg(long, value_name = "N")]
    pub max_concurrent: Option<usize>,

    /// Append every graph while suspended, then resume.
    ///
    /// Shows the dispatch order when all commits are already queued.
    #[arg(long)]
    pub start_suspended: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SYNCPIPE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the plan, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

// src/lib.rs

pub mod cli;
pub mod commit;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod graph;
pub mod logging;
pub mod store;
pub mod types;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::commit::PlanSource;
use crate::config::load_and_validate;
use crate::config::ConfigFile;
use crate::engine::{Pipeline, PipelineEvent};
use crate::exec::SimulatedWorker;

pub use crate::engine::PipelineBuilder;
pub use crate::errors::PipelineError;
pub use crate::graph::{DependencyEdge, Operation, OperationId};
pub use crate::types::{Algorithm, OperationStatus};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - plan loading and validation
/// - a pipeline restored from the plan's graphs
/// - the simulated worker
/// - event logging
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading plan '{}'", args.config))?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let plan = Arc::new(PlanSource::from_config(&cfg));
    let worker = Arc::new(SimulatedWorker::new(cfg.worker.clone()));
    let algorithm = args.algorithm.unwrap_or(cfg.pipeline.algorithm);
    let max_concurrent = args
        .max_concurrent
        .unwrap_or(cfg.pipeline.max_concurrent_operation_count);

    let started = Instant::now();
    let pipeline = Pipeline::builder(cfg.pipeline.name.clone())
        .algorithm(algorithm)
        .previous_names(cfg.pipeline.previous_names.clone())
        .max_concurrent_operation_count(max_concurrent)
        .suspended(usize::from(args.start_suspended))
        .restore_from(plan)
        .build(worker)?;

    spawn_event_logger(pipeline.clone());

    if args.start_suspended {
        info!(graphs = pipeline.graph_count(), "plan queued while suspended; resuming");
        pipeline.resume();
    }

    tokio::select! {
        _ = pipeline.wait_until_drained() => {
            println!(
                "pipeline '{}' drained {} operation(s) from {} graph(s) in {:.2?}",
                pipeline.name(),
                cfg.operation_count(),
                cfg.graph.len(),
                started.elapsed()
            );
        }
        res = tokio::signal::ctrl_c() => {
            res.context("listening for Ctrl+C")?;
            warn!(
                graphs = pipeline.graph_count(),
                active = pipeline.active_operations().len(),
                "interrupted before the pipeline drained"
            );
        }
    }

    Ok(())
}

/// Log every pipeline event together with the state it announces.
fn spawn_event_logger(pipeline: Pipeline) {
    let mut events = pipeline.subscribe();
    let weak = pipeline.downgrade();
    drop(pipeline);

    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "event logger lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let Some(pipeline) = weak.upgrade() else {
                break;
            };
            match event {
                PipelineEvent::QueueChanged => debug!(
                    graphs = pipeline.graph_count(),
                    active = pipeline.active_operations().len(),
                    "queue changed"
                ),
                PipelineEvent::SuspendCountChanged => {
                    info!(suspend_count = pipeline.suspend_count(), "suspend count changed")
                }
                PipelineEvent::ActiveStatusChanged => {
                    info!(is_active = pipeline.is_active(), "active status changed")
                }
            }
        }
    });
}

/// Simple dry-run output: print pipeline settings, graphs and operations.
fn print_dry_run(cfg: &ConfigFile) {
    println!("syncpipe dry-run");
    println!("  pipeline.name = {}", cfg.pipeline.name);
    println!("  pipeline.algorithm = {}", cfg.pipeline.algorithm);
    println!(
        "  pipeline.max_concurrent_operation_count = {}",
        cfg.pipeline.max_concurrent_operation_count
    );
    if !cfg.pipeline.previous_names.is_empty() {
        println!("  pipeline.previous_names = {:?}", cfg.pipeline.previous_names);
    }
    println!();

    println!("graphs ({}):", cfg.graph.len());
    for graph in cfg.graph.iter() {
        println!("  - snapshot {}", graph.snapshot);
        for op in graph.operation.iter() {
            println!("      {} (priority {})", op.name, op.priority);
            if !op.after.is_empty() {
                println!("        after: {:?}", op.after);
            }
        }
    }

    debug!("dry-run complete (no execution)");
}

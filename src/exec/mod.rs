// src/exec/mod.rs

//! Worker collaboration layer.
//!
//! The pipeline never performs the work an operation describes. It hands
//! dispatched operations to a [`Worker`], which must eventually report back
//! through the pipeline (`complete_operation`, `skip_operation` or
//! `reset_to_pending`).
//!
//! - [`worker`] defines the `Worker` trait.
//! - [`dispatch_loop`] owns the task that calls the worker outside the
//!   pipeline lock.
//! - [`simulated`] provides a timer-driven worker used by the CLI.

pub mod dispatch_loop;
pub mod simulated;
pub mod worker;

pub use dispatch_loop::spawn_dispatcher;
pub use simulated::SimulatedWorker;
pub use worker::Worker;

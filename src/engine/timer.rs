// src/engine/timer.rs

//! Hold-expiry timer.
//!
//! Nothing external happens at the instant a hold expires, so a background
//! task sleeps until the earliest pending hold and then runs a dispatch pass.
//! Every mutation pokes the timer so it re-reads the deadline.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::pipeline::WeakPipeline;

/// Spawn the timer loop for `pipeline`.
///
/// The loop exits when every sender of `wake_rx` is gone (the pipeline was
/// dropped).
pub fn spawn_hold_timer(pipeline: WeakPipeline, mut wake_rx: mpsc::UnboundedReceiver<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("hold timer started");

        loop {
            let sleep_for = {
                let Some(pipeline) = pipeline.upgrade() else {
                    break;
                };
                pipeline.next_hold_deadline().map(|deadline| {
                    (deadline - Utc::now())
                        .to_std()
                        .unwrap_or(Duration::ZERO)
                })
            };

            let expired = async {
                match sleep_for {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                wake = wake_rx.recv() => {
                    if wake.is_none() {
                        break;
                    }
                    // Collapse a burst of pokes into one re-read.
                    while wake_rx.try_recv().is_ok() {}
                }
                _ = expired => {
                    let Some(pipeline) = pipeline.upgrade() else {
                        break;
                    };
                    info!(pipeline = %pipeline.name(), "hold expired; running dispatch pass");
                    pipeline.dispatch_pass();
                }
            }
        }

        debug!("hold timer finished (pipeline dropped)");
    })
}

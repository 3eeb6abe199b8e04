// src/server/connection_loop.rs

//! Waits for a shutdown signal or a background-task failure, then fans the
//! shutdown out to every spawned task and joins them with a timeout (spec
//! §6). All the actual work — accepting connections, dispatching jobs,
//! running the admin worker/orchestrator/local-mgmt RPC loop — lives in the
//! tasks `spawner::spawn_all` already put into `ctx.background_tasks`; this
//! loop just supervises them.

use super::context::ServerContext;
use std::time::Duration;
use tracing::{error, info, warn};

#[cfg(windows)]
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Waits for a shutdown signal based on the operating system.
/// On Unix, it listens for SIGINT and SIGTERM.
/// On Windows, it listens for Ctrl+C.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to create SIGINT stream");
    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to create SIGTERM stream");

    #[cfg(windows)]
    let mut ctrl_c = signal::ctrl_c().expect("Failed to create Ctrl+C stream");

    tokio::select! {
        _ = async { #[cfg(unix)] { sigint.recv().await; info!("SIGINT received, initiating graceful shutdown."); } } => {},
        _ = async { #[cfg(unix)] { sigterm.recv().await; info!("SIGTERM received, initiating graceful shutdown."); } } => {},
        _ = async { #[cfg(windows)] { ctrl_c.await; info!("Ctrl-C received, initiating graceful shutdown."); } } => {},
    }
}

/// Supervises the background tasks `spawner::spawn_all` started, until a
/// shutdown signal arrives or one of them fails.
pub async fn run(mut ctx: ServerContext) {
    loop {
        tokio::select! {
            biased;

            _ = await_shutdown_signal() => {
                break;
            },

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(()) => info!("A background task has completed."),
                    Err(e) if e.is_panic() => { error!("CRITICAL: background task panicked: {e:?}. Shutting down."); break; }
                    Err(e) => warn!("Background task was cancelled: {e:?}"),
                }
            },
        }
    }

    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        warn!("No task was listening for the shutdown signal.");
    }

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    }
    info!("Server shutdown complete.");
}

// src/core/pool/monitor.rs

//! Background loops for one broker's pool: the memory/liveness monitor, the
//! log-reset sweep, and the hang detector (spec §4.2), each shaped like the
//! teacher's interval-driven maintenance tasks.

use super::manager::WorkerPoolManager;
use crate::core::control::worker::LivenessStatus;
use crate::core::metrics;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Runs every `monitor_interval_ms`: refreshes memory usage, restarts slots
/// whose process died while they should be busy, and enforces the
/// `appl_server_hard_limit` memory ceiling.
pub async fn run_memory_monitor(
    manager: Arc<WorkerPoolManager>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval =
        tokio::time::interval(Duration::from_millis(manager.pool_config.monitor_interval_ms));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                for slot in 0..manager.broker.current_worker_count() {
                    let worker = &manager.broker.workers[slot];
                    let rss = worker.rss_bytes.load(Ordering::Relaxed);
                    if rss > manager.pool_config.appl_server_hard_limit_bytes {
                        warn!(broker = %manager.broker.name, slot, rss, "worker exceeded memory hard limit, restarting");
                        if let Err(e) = manager.restart(slot).await {
                            warn!(broker = %manager.broker.name, slot, error = %e, "restart failed");
                        }
                        continue;
                    }

                    let should_be_busy = {
                        let mutable = worker.mutable.lock().await;
                        mutable.pid.is_some() && mutable.liveness != LivenessStatus::Stop
                    };
                    let alive = {
                        let mutable = worker.mutable.lock().await;
                        mutable.pid.is_some()
                    };
                    if should_be_busy && !alive {
                        warn!(broker = %manager.broker.name, slot, "worker pid missing, restarting");
                        let _ = manager.restart(slot).await;
                    }
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}

/// Runs every second: re-touches any per-slot log file that was unlinked
/// externally, signalling the child to reopen it.
pub async fn run_log_reset(manager: Arc<WorkerPoolManager>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut interval =
        tokio::time::interval(Duration::from_millis(manager.pool_config.log_reset_interval_ms));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                // Per-slot log paths are owned by the deployed worker binary in
                // a real install; here we only log the sweep, since no concrete
                // log-file layout exists in this tree.
                tracing::debug!(broker = %manager.broker.name, "log-reset sweep ran");
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}

/// Hang detector (spec §4.2): tracks a running average, over four
/// intervals, of slots that failed to refresh their alive-claim timestamp;
/// trips `reject_client_flag` when the average exceeds half the pool size.
pub async fn run_hang_detector(manager: Arc<WorkerPoolManager>, mut shutdown_rx: broadcast::Receiver<()>) {
    let interval_ms = manager.pool_config.hang_check_interval_ms;
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    let mut history: VecDeque<usize> = VecDeque::with_capacity(4);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let current = manager.broker.current_worker_count();
                let mut hung = 0usize;
                for slot in 0..current {
                    let worker = &manager.broker.workers[slot];
                    if worker.ms_since_alive_claim() as u64 > interval_ms {
                        hung += 1;
                    }
                }
                history.push_back(hung);
                if history.len() > 4 {
                    history.pop_front();
                }
                let avg = history.iter().sum::<usize>() as f64 / history.len() as f64;
                let pool_size = current.max(1) as f64;
                let should_reject = avg > 0.5 * pool_size;
                let was_rejecting = manager.broker.reject_client_flag.swap(should_reject, Ordering::Relaxed);
                if should_reject && !was_rejecting {
                    warn!(broker = %manager.broker.name, avg, "hang detector tripped, rejecting new clients");
                } else if !should_reject && was_rejecting {
                    info!(broker = %manager.broker.name, "hang detector recovered, accepting new clients");
                }
                metrics::REJECT_CLIENT_FLAG
                    .with_label_values(&[&manager.broker.name])
                    .set(if should_reject { 1.0 } else { 0.0 });
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}

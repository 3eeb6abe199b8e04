// src/core/dispatch/dispatcher.rs

//! Connection Dispatcher (C3, spec §4.3): pulls jobs off a broker's job
//! queue, finds or makes room for an idle worker, and hands the client
//! socket off to it over a per-slot Unix-domain connection.

use super::fdpass;
use crate::core::control::broker::BrokerHandle;
use crate::core::control::worker::ConnStatus;
use crate::core::errors::BrokerError;
use crate::core::metrics;
use crate::core::pool::WorkerPoolManager;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Between-retry backoff while waiting for an admissible worker, matching
/// the source's short poll interval during pool saturation (spec §4.3).
const RETRY_BACKOFF: Duration = Duration::from_millis(30);
const JOB_WAIT: Duration = Duration::from_millis(200);

fn worker_socket_path(control_key: &str, broker_name: &str, slot: usize) -> String {
    format!("/tmp/shardbroker-{control_key}-{broker_name}-{slot}.sock")
}

/// Main dispatch loop for one broker: runs until `shutdown_rx` fires.
pub async fn run(manager: Arc<WorkerPoolManager>, mut shutdown_rx: broadcast::Receiver<()>) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                info!(broker = %manager.broker.name, "dispatcher shutting down");
                break;
            }
            _ = manager.broker.job_queue.wait_for_job(JOB_WAIT) => {}
        }

        while let Some(job) = manager.broker.job_queue.pop().await {
            if let Err(e) = dispatch_one(&manager, job).await {
                warn!(broker = %manager.broker.name, error = %e, "dispatch failed");
            }
        }
    }
}

async fn dispatch_one(
    manager: &WorkerPoolManager,
    job: crate::core::control::job_queue::JobEntry,
) -> Result<(), BrokerError> {
    let broker: &Arc<BrokerHandle> = &manager.broker;

    let slot = loop {
        if let Some(slot) = manager.find_idle().await {
            break slot;
        }

        if let Some(new_slot) = manager.find_add(None).await {
            match manager.ensure_started(new_slot).await {
                Ok(_) => continue,
                Err(e) => warn!(broker = %broker.name, slot = new_slot, error = %e, "failed to expand pool"),
            }
        }

        if job.received_at.elapsed() > Duration::from_secs(broker.session_timeout_secs) {
            broker.counters.jobs_rejected.fetch_add(1, Ordering::Relaxed);
            metrics::JOBS_REJECTED_TOTAL
                .with_label_values(&[&broker.name])
                .inc();
            return Err(BrokerError::FreeServer);
        }

        broker.job_queue.age_all().await;
        tokio::time::sleep(RETRY_BACKOFF).await;
    };

    manager.mark_busy(slot).await;
    let worker = &broker.workers[slot];

    let socket_path = worker_socket_path(&manager.control_key, &broker.name, slot);
    let conn = match UnixStream::connect(&socket_path).await {
        Ok(c) => c,
        Err(e) => {
            manager.mark_idle(slot).await;
            return Err(BrokerError::Communication(format!(
                "connect to worker slot {slot} at {socket_path}: {e}"
            )));
        }
    };

    {
        let mut con_status = worker.con_status.lock().await;
        *con_status = ConnStatus::InTran;
    }

    let client_fd = job.socket.as_raw_fd();
    let payload = job.client_addr.ip().to_string().into_bytes();
    let conn_std = conn
        .into_std()
        .map_err(|e| BrokerError::Communication(format!("unix conn downgrade failed: {e}")))?;

    let handoff = fdpass::send_fd(conn_std, client_fd, payload).await;

    {
        let mut mutable = worker.mutable.lock().await;
        mutable.last_client_addr = Some(job.client_addr);
        mutable.last_client_version = job.client_version;
    }
    worker.touch_access();
    worker.claim_alive();

    match handoff {
        Ok(()) => {
            broker.counters.jobs_dispatched.fetch_add(1, Ordering::Relaxed);
            metrics::JOBS_DISPATCHED_TOTAL
                .with_label_values(&[&broker.name])
                .inc();
            debug!(broker = %broker.name, slot, client = %job.client_addr, "job dispatched");
            {
                let mut con_status = worker.con_status.lock().await;
                *con_status = ConnStatus::OutTran;
            }
            Ok(())
        }
        Err(e) => {
            manager.mark_idle(slot).await;
            let mut con_status = worker.con_status.lock().await;
            *con_status = ConnStatus::OutTran;
            Err(e)
        }
    }
}

/// `QUERY_CANCEL` (spec §4.3, §6): delivers `SIGINT` to a busy worker's pid
/// if the caller's client ip matches the one the slot is currently serving.
pub async fn query_cancel(
    manager: &WorkerPoolManager,
    slot: usize,
    pid: u32,
    caller_ip: &str,
) -> Result<(), BrokerError> {
    let broker = &manager.broker;
    if slot >= broker.current_worker_count() {
        return Err(BrokerError::InvalidArgument("slot out of range".into()));
    }
    let worker = &broker.workers[slot];
    let mutable = worker.mutable.lock().await;

    if mutable.pid != Some(pid) {
        return Err(BrokerError::InvalidArgument("pid does not match slot".into()));
    }
    let owner_matches = mutable
        .last_client_addr
        .map(|a| a.ip().to_string() == caller_ip)
        .unwrap_or(false);
    if !owner_matches {
        return Err(BrokerError::InvalidArgument(
            "client ip does not match slot owner".into(),
        ));
    }
    let con_status = worker.con_status.lock().await;
    if *con_status != ConnStatus::InTran {
        return Err(BrokerError::InvalidArgument("slot is not busy".into()));
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid as i32), Signal::SIGINT)
            .map_err(|e| BrokerError::Communication(format!("signal delivery failed: {e}")))?;
    }

    Ok(())
}

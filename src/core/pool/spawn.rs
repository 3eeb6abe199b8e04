// src/core/pool/spawn.rs

//! Spawns the worker binary via `tokio::process::Command`, standing in for
//! the source's `fork`/`exec` (spec §4.2, §9 Design Notes "Cross-process
//! cyclic structure").

use crate::core::errors::BrokerError;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{info, warn};

/// Outcome of spawning one worker slot.
pub struct SpawnedWorker {
    pub child: Child,
    pub pid: u32,
}

/// Spawns the worker binary with argv naming the broker and slot index and
/// an environment carrying the control-region key (`APPL_SERVER_SHM_KEY`),
/// then waits (bounded) for the child to signal readiness.
///
/// The real worker process would flip `ready_tx` over its own handshake
/// channel after attaching to the control region; here the supervising
/// caller owns `ready_rx` and is expected to drive it from whatever
/// out-of-band signal the deployed worker binary uses. If no signal arrives
/// within `ready_timeout`, the child is killed and the slot is abandoned to
/// the pool monitor, matching spec §4.2's failure model.
pub async fn spawn_worker(
    worker_binary: &str,
    broker_name: &str,
    slot: usize,
    control_key: &str,
    mut ready_rx: watch::Receiver<bool>,
    ready_timeout: Duration,
) -> Result<SpawnedWorker, BrokerError> {
    let mut child = Command::new(worker_binary)
        .arg(broker_name)
        .arg(slot.to_string())
        .env("APPL_SERVER_SHM_KEY", control_key)
        .env("AS_ID", slot.to_string())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BrokerError::Spawn(format!("{worker_binary}: {e}")))?;

    let pid = child
        .id()
        .ok_or_else(|| BrokerError::Spawn("child exited before pid was observable".into()))?;

    let wait = tokio::time::timeout(ready_timeout, async {
        while !*ready_rx.borrow() {
            if ready_rx.changed().await.is_err() {
                return false;
            }
        }
        true
    })
    .await;

    match wait {
        Ok(true) => {
            info!(broker = broker_name, slot, pid, "worker started");
            Ok(SpawnedWorker { child, pid })
        }
        _ => {
            warn!(
                broker = broker_name,
                slot, pid, "worker did not signal ready in time, abandoning"
            );
            let _ = child.start_kill();
            Err(BrokerError::Spawn(format!(
                "worker slot {slot} did not become ready within {ready_timeout:?}"
            )))
        }
    }
}

/// Sends a graceful-then-forceful termination to a running child, matching
/// spec §4.2's `stop(slot)` contract (bounded retries, then kill).
pub async fn stop_worker(child: &mut Child, tries: u32, per_try: Duration) -> Result<(), BrokerError> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }

    for _ in 0..tries {
        match tokio::time::timeout(per_try, child.wait()).await {
            Ok(Ok(_)) => return Ok(()),
            Ok(Err(e)) => return Err(BrokerError::Io(std::sync::Arc::new(e))),
            Err(_) => continue,
        }
    }

    child
        .kill()
        .await
        .map_err(|e| BrokerError::Io(std::sync::Arc::new(e)))
}

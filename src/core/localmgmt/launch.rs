// src/core/localmgmt/launch.rs

//! `LAUNCH_PROCESS` (spec §4.8): validates a sender-provided process kind
//! against a fixed allow-list, forks/execs with a scoped environment, and
//! exposes a waiter that reads the child's stdout/stderr/exit status.

use crate::core::errors::BrokerError;
use crate::core::shard::controller::NodeMigrationLauncher;
use crate::core::shard::orchestrator::MigratorLauncher;
use crate::core::protocol::NodeSpec;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{info, warn};

/// The allow-listed process kinds (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessId {
    Migrator,
    CopyLog,
    ApplyLog,
    Server,
}

impl ProcessId {
    pub fn from_wire(id: i32) -> Result<Self, BrokerError> {
        match id {
            0 => Ok(ProcessId::Migrator),
            1 => Ok(ProcessId::CopyLog),
            2 => Ok(ProcessId::ApplyLog),
            3 => Ok(ProcessId::Server),
            _ => Err(BrokerError::InvalidArgument(format!("unknown process id {id}"))),
        }
    }

    fn binary_name(self) -> &'static str {
        match self {
            ProcessId::Migrator => "rye-migrator",
            ProcessId::CopyLog => "rye-copylog",
            ProcessId::ApplyLog => "rye-applylog",
            ProcessId::Server => "rye-server",
        }
    }
}

pub struct LaunchHandle {
    pub pid: u32,
    child: tokio::process::Child,
}

pub struct LaunchOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Where launched binaries live; in a real deployment this is the rye
/// install's `bin/` directory.
pub struct Launcher {
    pub bin_dir: String,
}

impl Launcher {
    pub fn new(bin_dir: impl Into<String>) -> Self {
        Self { bin_dir: bin_dir.into() }
    }

    /// Forks/execs the named process kind with `args`, returning a handle
    /// the caller can later pass to `wait`.
    pub async fn launch(&self, process_id: ProcessId, args: &[String]) -> Result<LaunchHandle, BrokerError> {
        let path = format!("{}/{}", self.bin_dir, process_id.binary_name());
        let mut child = Command::new(&path)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BrokerError::Spawn(format!("{path}: {e}")))?;

        let pid = child
            .id()
            .ok_or_else(|| BrokerError::Spawn("child exited before pid was observable".into()))?;

        info!(?process_id, pid, "launched process");
        Ok(LaunchHandle { pid, child })
    }

    /// Waits for the child, bounded by `timeout_ms` (`-1` means wait
    /// forever), and collects stdout/stderr for later retrieval.
    pub async fn wait(&self, mut handle: LaunchHandle, timeout_ms: i64) -> Result<LaunchOutcome, BrokerError> {
        let wait_fut = async {
            let mut stdout = String::new();
            let mut stderr = String::new();
            if let Some(mut out) = handle.child.stdout.take() {
                let _ = out.read_to_string(&mut stdout).await;
            }
            if let Some(mut err) = handle.child.stderr.take() {
                let _ = err.read_to_string(&mut stderr).await;
            }
            let status = handle.child.wait().await?;
            Ok::<_, std::io::Error>((status, stdout, stderr))
        };

        let (status, stdout, stderr) = if timeout_ms < 0 {
            wait_fut.await?
        } else {
            match tokio::time::timeout(std::time::Duration::from_millis(timeout_ms as u64), wait_fut).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(pid = handle.pid, "launched process did not exit within timeout");
                    return Err(BrokerError::RequestTimeout);
                }
            }
        };

        Ok(LaunchOutcome {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

/// Adapts `Launcher` to the `ADD_NODE` two-phase migration contract (spec
/// §4.6): schema migration runs `copy-log`, global-table migration runs
/// `apply-log`, matching how the source's migration helper pipeline splits
/// schema replay from data replay.
#[async_trait]
impl NodeMigrationLauncher for Launcher {
    async fn run_schema_migration(&self, src_node_id: i32, node: &NodeSpec) -> Result<(), BrokerError> {
        let args = vec![
            src_node_id.to_string(),
            node.node_id.to_string(),
            node.host.clone(),
            node.port.to_string(),
        ];
        let handle = Launcher::launch(self, ProcessId::CopyLog, &args).await?;
        let outcome = Launcher::wait(self, handle, -1).await?;
        if outcome.exit_code != 0 {
            return Err(BrokerError::SchemaMigrationFail(outcome.stderr));
        }
        Ok(())
    }

    async fn run_global_table_migration(&self, src_node_id: i32, node: &NodeSpec) -> Result<(), BrokerError> {
        let args = vec![
            src_node_id.to_string(),
            node.node_id.to_string(),
            node.host.clone(),
            node.port.to_string(),
        ];
        let handle = Launcher::launch(self, ProcessId::ApplyLog, &args).await?;
        let outcome = Launcher::wait(self, handle, -1).await?;
        if outcome.exit_code != 0 {
            return Err(BrokerError::GlobalTableMigrationFail(outcome.stderr));
        }
        Ok(())
    }
}

/// Adapts `Launcher` to the orchestrator's migrator launches (spec §4.7
/// step 5): opcode `MIGRATOR`, naming group id, source/destination node
/// ids, destination host/port, and `--run-slave` when slave-mode was
/// chosen.
#[async_trait]
impl MigratorLauncher for Launcher {
    async fn launch(&self, group_id: i32, src_nodeid: i32, dest_nodeid: i32, run_slave: bool) -> Result<(), BrokerError> {
        let mut args = vec![group_id.to_string(), src_nodeid.to_string(), dest_nodeid.to_string()];
        if run_slave {
            args.push("--run-slave".to_string());
        }
        let handle = Launcher::launch(self, ProcessId::Migrator, &args).await?;
        let outcome = Launcher::wait(self, handle, -1).await?;
        if outcome.exit_code != 0 {
            return Err(BrokerError::Internal(format!("migrator exited {}: {}", outcome.exit_code, outcome.stderr)));
        }
        Ok(())
    }
}

// src/server/context.rs

use crate::config::Config;
use crate::core::control::ControlRegion;
use crate::core::localmgmt::launch::Launcher;
use crate::core::localmgmt::service::LocalMgmtService;
use crate::core::pool::WorkerPoolManager;
use crate::core::shard::ShardController;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// A bound normal broker: its runtime handle, pool manager, and listener.
pub struct NormalBroker {
    pub manager: Arc<WorkerPoolManager>,
    pub listener: TcpListener,
}

/// A bound shard-management broker.
pub struct ShardMgmtBroker {
    pub controller: Arc<ShardController>,
    pub listener: TcpListener,
    pub port: i32,
    /// Drives the orchestrator's migrator launches (`MigratorLauncher`); the
    /// same underlying `Launcher` the controller uses for its own
    /// `NodeMigrationLauncher` hooks, kept as a concrete type here since the
    /// two traits aren't object-compatible with each other.
    pub migrator_launcher: Arc<Launcher>,
}

/// A bound local-management broker.
pub struct LocalMgmtBroker {
    pub service: Arc<LocalMgmtService>,
    pub listener: TcpListener,
}

/// Holds all the initialized state required to run the server's main loop:
/// one entry per configured broker, grouped by role, plus the shared control
/// region and shutdown machinery (spec §6: brokers run as independent task
/// sets inside one process).
pub struct ServerContext {
    pub config: Config,
    pub region: Arc<ControlRegion>,
    pub normal: Vec<NormalBroker>,
    pub shard_mgmt: Vec<ShardMgmtBroker>,
    pub local_mgmt: Vec<LocalMgmtBroker>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<()>,
}

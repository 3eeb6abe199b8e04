// src/server/initialization.rs

//! Startup sequence (spec §6): build the control region, bind every
//! configured broker's listener, and wire up the role-specific collaborator
//! (pool manager, shard controller, or local-mgmt service) each broker needs.

use super::context::{LocalMgmtBroker, NormalBroker, ServerContext, ShardMgmtBroker};
use crate::config::{BindAddr, BrokerRole, Config};
use crate::core::control::ControlRegion;
use crate::core::localmgmt::launch::Launcher;
use crate::core::localmgmt::service::LocalMgmtService;
use crate::core::metastore::MetaStoreClient;
use crate::core::pool::WorkerPoolManager;
use crate::core::shard::ShardController;
use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;

fn bind_port(role: BrokerRole, name: &str, bind: &BindAddr) -> Result<u16> {
    match bind {
        BindAddr::Tcp { port } => Ok(*port),
        BindAddr::Unix { .. } => Err(anyhow!(
            "broker '{name}' (role {role:?}): unix-domain binds are rejected by Config::validate; \
             reaching this point means a config bypassed validation"
        )),
    }
}

/// Runs the full setup sequence and returns a `ServerContext` ready for
/// `spawner::spawn_all`.
pub async fn setup(config: Config) -> Result<ServerContext> {
    let region = ControlRegion::build(&config);
    info!(control_key = %region.key, brokers = config.brokers.len(), "control region built");

    // One shared launcher backs both the shard controller's node-migration
    // hooks and the orchestrator's migrator launches (spec §4.6 two-phase
    // add, §4.7 step 5) — both go through the same allow-listed process
    // launch surface local-mgmt exposes.
    let bin_dir = std::env::var("RYE_BIN_DIR").unwrap_or_else(|_| "/usr/local/rye/bin".to_string());
    let launcher = Arc::new(Launcher::new(bin_dir.clone()));

    let needs_metastore = config.brokers.iter().any(|b| b.role == BrokerRole::ShardMgmt);
    let metastore = if needs_metastore {
        Some(Arc::new(
            MetaStoreClient::connect(&config.metastore)
                .await
                .context("connecting to metadata store")?,
        ))
    } else {
        None
    };

    let mut normal = Vec::new();
    let mut shard_mgmt = Vec::new();
    let mut local_mgmt = Vec::new();

    for broker_config in &config.brokers {
        let port = bind_port(broker_config.role, &broker_config.name, &broker_config.bind)?;
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("binding broker '{}' to port {port}", broker_config.name))?;
        info!(broker = %broker_config.name, role = ?broker_config.role, port, "bound");

        match broker_config.role {
            BrokerRole::Normal => {
                let handle = region
                    .broker(&broker_config.name)
                    .ok_or_else(|| anyhow!("broker '{}' missing from control region", broker_config.name))?;
                let manager = Arc::new(WorkerPoolManager::new(
                    handle,
                    config.control_key.clone(),
                    config.pool.clone(),
                ));
                normal.push(NormalBroker { manager, listener });
            }
            BrokerRole::ShardMgmt => {
                let metastore = metastore
                    .clone()
                    .ok_or_else(|| anyhow!("shard-mgmt broker '{}' requires metastore", broker_config.name))?;
                let controller = Arc::new(ShardController::new(
                    metastore,
                    config.migration.clone(),
                    launcher.clone(),
                ));
                prime_cache(&controller).await;
                shard_mgmt.push(ShardMgmtBroker {
                    controller,
                    listener,
                    port: port as i32,
                    migrator_launcher: launcher.clone(),
                });
            }
            BrokerRole::LocalMgmt => {
                let conf_dir = std::env::var("RYE_CONF_DIR").unwrap_or_else(|_| ".".to_string());
                let heartbeat_addr = std::env::var("HEARTBEAT_ADDR").ok();
                let service = Arc::new(LocalMgmtService::new(Launcher::new(bin_dir.clone()), conf_dir, heartbeat_addr));
                local_mgmt.push(LocalMgmtBroker { service, listener });
            }
        }
    }

    let (shutdown_tx, _) = broadcast::channel(1);

    Ok(ServerContext {
        config,
        region,
        normal,
        shard_mgmt,
        local_mgmt,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

/// Loads `shard_db.created_at` into the cache up front, if the cluster has
/// already been `INIT`-ed, so the first `GET_SHARD_INFO` doesn't see a
/// spurious `created_at` mismatch against a freshly-started broker's 0.
/// A metastore that isn't reachable yet, or a cluster that hasn't been
/// `INIT`-ed, both leave the cache at its zero default rather than failing
/// startup.
async fn prime_cache(controller: &ShardController) {
    let row: Option<(chrono::DateTime<chrono::Utc>,)> =
        sqlx::query_as("SELECT created_at FROM shard_db LIMIT 1")
            .fetch_optional(controller.metastore.pool())
            .await
            .unwrap_or(None);
    if let Some((created_at,)) = row {
        controller.cache.set_created_at(created_at.timestamp());
    }
}

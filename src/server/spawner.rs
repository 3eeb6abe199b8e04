// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks: per-broker
//! pool monitors and dispatch for normal brokers, the admin worker/migration
//! orchestrator/local-mgmt-sync trio for shard-mgmt brokers, the RPC loop for
//! local-mgmt brokers, and the metrics server if enabled (spec §6).

use super::context::ServerContext;
use super::metrics_server;
use crate::core::dispatch::{acceptor, dispatcher};
use crate::core::localmgmt::service as localmgmt_service;
use crate::core::pool::monitor;
use crate::core::shard::{orchestrator, run_admin_worker, sync as shard_sync};
use anyhow::Result;
use std::time::Duration;
use tracing::info;

/// Spawns all background tasks into `ctx.background_tasks`, one per broker
/// collaborator, keyed off the listener/handle/service that `initialization::
/// setup` already bound.
pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let shutdown_tx = ctx.shutdown_tx.clone();
    let background_tasks = &mut ctx.background_tasks;

    for normal in std::mem::take(&mut ctx.normal) {
        let manager = normal.manager;
        let broker = manager.broker.clone();

        let mgr = manager.clone();
        let rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move { monitor::run_memory_monitor(mgr, rx).await });

        let mgr = manager.clone();
        let rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move { monitor::run_log_reset(mgr, rx).await });

        let mgr = manager.clone();
        let rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move { monitor::run_hang_detector(mgr, rx).await });

        let rx = shutdown_tx.subscribe();
        let listener = normal.listener;
        background_tasks.spawn(async move { acceptor::run(broker, listener, rx).await });

        let mgr = manager.clone();
        let rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move { dispatcher::run(mgr, rx).await });
    }

    for shard in std::mem::take(&mut ctx.shard_mgmt) {
        let controller = shard.controller;
        let migrator_launcher = shard.migrator_launcher;
        let port = shard.port;

        let ctrl = controller.clone();
        let rx = shutdown_tx.subscribe();
        let listener = shard.listener;
        background_tasks.spawn(async move { run_admin_worker(ctrl, listener, rx).await });

        let ctrl = controller.clone();
        let rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move { orchestrator::run(ctrl, migrator_launcher, rx).await });

        let ctrl = controller;
        let interval = Duration::from_secs(ctrl.migration_config.orchestrator_interval_secs);
        let rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move { shard_sync::run(ctrl, port, interval, rx).await });
    }

    for local in std::mem::take(&mut ctx.local_mgmt) {
        let service = local.service;
        let listener = local.listener;
        let rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move { localmgmt_service::run(service, listener, rx).await });
    }

    if ctx.config.metrics.enabled {
        let rx = shutdown_tx.subscribe();
        let port = ctx.config.metrics.port;
        background_tasks.spawn(async move { metrics_server::run_metrics_server(port, rx).await });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    info!("All background tasks have been spawned.");
    Ok(())
}

// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Build the control region, bind every broker's listener, and wire up
    // each broker's role-specific collaborator.
    let mut server_context = initialization::setup(config).await?;

    // 2. Spawn all background tasks (pool monitors, dispatch, admin worker,
    // orchestrator, local-mgmt sync, metrics server).
    spawner::spawn_all(&mut server_context).await?;

    // 3. Supervise until shutdown.
    connection_loop::run(server_context).await;

    Ok(())
}

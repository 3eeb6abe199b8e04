// src/core/shard/orchestrator.rs

//! Migration Orchestrator (C7, spec §4.7): flips a bounded number of
//! `SCHEDULED` rows per source node to `MIGRATOR_RUN`, launches a migrator
//! helper for each, and reaps rows that got stuck in `MIGRATOR_RUN` past the
//! start-wait timeout.

use super::controller::ShardController;
use crate::core::metastore::schema::{
    MIGRATION_STATUS_MIGRATOR_RUN, MIGRATION_STATUS_SCHEDULED,
};
use crate::core::metrics;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// One row flipped to `MIGRATOR_RUN` this pass, carried forward to the
/// launch step outside the transaction (spec §4.7 step 5: "Outside the
/// transaction...").
struct FlippedRow {
    migration_id: i64,
    group_id: i32,
    src_nodeid: i32,
    dest_nodeid: i32,
}

/// Launches the actual migrator helper process; a concrete worker binary is
/// out of scope here (spec Non-goals), so launching goes through the same
/// local-mgmt RPC surface C8 exposes.
#[async_trait::async_trait]
pub trait MigratorLauncher: Send + Sync {
    async fn launch(&self, group_id: i32, src_nodeid: i32, dest_nodeid: i32, run_slave: bool) -> Result<(), crate::core::errors::BrokerError>;
}

pub struct NoopMigratorLauncher;

#[async_trait::async_trait]
impl MigratorLauncher for NoopMigratorLauncher {
    async fn launch(&self, _group_id: i32, _src_nodeid: i32, _dest_nodeid: i32, _run_slave: bool) -> Result<(), crate::core::errors::BrokerError> {
        Ok(())
    }
}

/// Drives the scheduler loop: wakes on `controller.orchestrator_notify` or
/// every `orchestrator_interval_secs`, whichever comes first (spec step 7:
/// "Schedule a re-wake in 60 s if any jobs remain waiting").
pub async fn run(
    controller: Arc<ShardController>,
    launcher: Arc<dyn MigratorLauncher>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let interval = Duration::from_secs(controller.migration_config.orchestrator_interval_secs);
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            _ = controller.orchestrator_notify.notified() => {}
            _ = tokio::time::sleep(interval) => {}
        }

        if let Err(e) = run_once(&controller, launcher.as_ref()).await {
            error!(error = %e, "migration orchestrator pass failed");
        }
    }
}

async fn run_once(controller: &ShardController, launcher: &dyn MigratorLauncher) -> Result<(), crate::core::errors::BrokerError> {
    // Step 4: reap rows stuck in MIGRATOR_RUN past the start-wait timeout.
    let stale_secs = controller.migration_config.migrator_start_wait_secs as f64;
    let stale: Vec<(i64,)> = sqlx::query_as(
        "SELECT id FROM shard_migration WHERE status = $1 AND modified_at < now() - ($2 || ' seconds')::interval",
    )
    .bind(MIGRATION_STATUS_MIGRATOR_RUN)
    .bind(stale_secs.to_string())
    .fetch_all(controller.metastore.pool())
    .await?;

    if !stale.is_empty() {
        let ids: Vec<i64> = stale.into_iter().map(|(id,)| id).collect();
        sqlx::query("UPDATE shard_migration SET status = 'FAILED', modified_at = now() WHERE id = ANY($1)")
            .bind(&ids)
            .execute(controller.metastore.pool())
            .await?;
        metrics::MIGRATIONS_FAILED_TOTAL.inc_by(ids.len() as f64);
        warn!(count = ids.len(), "orchestrator: reaped stuck MIGRATOR_RUN rows");
    }

    // Step 1: per-source in-flight counts.
    let in_flight: Vec<(i32, i64)> = sqlx::query_as(
        "SELECT src_nodeid, count(*) FROM shard_migration WHERE status = $1 GROUP BY src_nodeid",
    )
    .bind(MIGRATION_STATUS_MIGRATOR_RUN)
    .fetch_all(controller.metastore.pool())
    .await?;
    let in_flight: HashMap<i32, i64> = in_flight.into_iter().collect();

    let scheduled_by_src: Vec<(i32, i64)> = sqlx::query_as(
        "SELECT src_nodeid, count(*) FROM shard_migration WHERE status = $1 GROUP BY src_nodeid",
    )
    .bind(MIGRATION_STATUS_SCHEDULED)
    .fetch_all(controller.metastore.pool())
    .await?;

    let mut flipped: Vec<FlippedRow> = Vec::new();

    for (src_nodeid, scheduled_count) in scheduled_by_src {
        let current = in_flight.get(&src_nodeid).copied().unwrap_or(0);
        let run_migrators = (controller.migration_config.max_migrators_per_source as i64 - current).max(0);
        let to_flip = run_migrators.min(scheduled_count);
        if to_flip == 0 {
            continue;
        }

        let mut tx = controller.metastore.begin().await?;
        let rows: Vec<(i64, i32, i32)> = sqlx::query_as(
            "SELECT id, group_id, dest_nodeid FROM shard_migration \
             WHERE src_nodeid = $1 AND status = $2 \
             ORDER BY order_in_source \
             LIMIT $3 FOR UPDATE",
        )
        .bind(src_nodeid)
        .bind(MIGRATION_STATUS_SCHEDULED)
        .bind(to_flip)
        .fetch_all(&mut *tx)
        .await?;

        for (id, _, _) in &rows {
            sqlx::query("UPDATE shard_migration SET status = $1, modified_at = now() WHERE id = $2")
                .bind(MIGRATION_STATUS_MIGRATOR_RUN)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        for (id, group_id, dest_nodeid) in rows {
            flipped.push(FlippedRow { migration_id: id, group_id, src_nodeid, dest_nodeid });
        }
    }

    // Step 5: launch a helper for each flipped row, outside the transaction.
    for row in flipped {
        let run_slave = rand::thread_rng().gen_bool(0.5);
        metrics::MIGRATIONS_STARTED_TOTAL.inc();
        match launcher.launch(row.group_id, row.src_nodeid, row.dest_nodeid, run_slave).await {
            Ok(()) => info!(migration_id = row.migration_id, group_id = row.group_id, "migrator launched"),
            Err(e) => {
                error!(migration_id = row.migration_id, group_id = row.group_id, error = %e, "migrator launch failed");
                let _ = sqlx::query("UPDATE shard_migration SET status = 'FAILED', modified_at = now() WHERE id = $1")
                    .bind(row.migration_id)
                    .execute(controller.metastore.pool())
                    .await;
                metrics::MIGRATIONS_FAILED_TOTAL.inc();
            }
        }
    }

    Ok(())
}

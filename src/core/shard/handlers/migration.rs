// src/core/shard/handlers/migration.rs

//! `MIGRATION_START` / `MIGRATION_END` (spec §4.6). `START` commits and
//! leaves the connection in a waiting state (driven by the admin loop in
//! `core::shard::mod`); `END` — or the automatic compensation run on
//! disconnect — is this module's other half.

use crate::core::errors::BrokerError;
use crate::core::metastore::schema::MIGRATION_STATUS_MIGRATION_STARTED;
use crate::core::shard::controller::ShardController;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::time::sleep;

const QUEUE_POLL: Duration = Duration::from_millis(50);

pub async fn start(
    controller: &ShardController,
    groupid: i32,
    dest_nodeid: i32,
    num_shard_keys: i32,
    timeout_sec: i32,
) -> Result<(), BrokerError> {
    let _ = num_shard_keys;
    let deadline = Instant::now() + Duration::from_secs(timeout_sec.max(0) as u64);

    loop {
        let ddl = controller.counters.ddl_req_count.load(Ordering::Relaxed);
        let gc = controller.counters.gc_req_count.load(Ordering::Relaxed);
        if ddl == 0 && gc == 0 {
            break;
        }
        if Instant::now() >= deadline {
            return Err(BrokerError::RequestTimeout);
        }
        sleep(QUEUE_POLL).await;
    }

    let mut tx = controller.metastore.begin().await?;

    let src: Option<(i32,)> =
        sqlx::query_as("SELECT current_node_id FROM shard_groupid WHERE group_id = $1")
            .bind(groupid)
            .fetch_optional(&mut *tx)
            .await?;
    let src_nodeid = src.ok_or(BrokerError::MigrationInvalidNodeId)?.0;
    if src_nodeid == dest_nodeid {
        tx.rollback().await?;
        return Err(BrokerError::MigrationInvalidNodeId);
    }

    let nodes: (i64,) = sqlx::query_as(
        "SELECT count(*) FROM shard_node WHERE node_id IN ($1, $2)",
    )
    .bind(src_nodeid)
    .bind(dest_nodeid)
    .fetch_one(&mut *tx)
    .await?;
    if nodes.0 != 2 {
        tx.rollback().await?;
        return Err(BrokerError::MigrationInvalidNodeId);
    }

    sqlx::query(
        "UPDATE shard_migration SET status = $1, modified_at = now() \
         WHERE group_id = $2 AND src_nodeid = $3 AND dest_nodeid = $4",
    )
    .bind(MIGRATION_STATUS_MIGRATION_STARTED)
    .bind(groupid)
    .bind(src_nodeid)
    .bind(dest_nodeid)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE shard_db SET mig_req_count = mig_req_count + 1")
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    controller.counters.mig_req_count.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

/// `MIGRATION_END`, invoked either with `success = true` from the matching
/// client request, or `success = false` as the automatic compensation run
/// when the client disconnects before sending it.
pub async fn end(controller: &ShardController, groupid: i32, success: bool) -> Result<(), BrokerError> {
    let mut tx = controller.metastore.begin().await?;
    sqlx::query("UPDATE shard_db SET mig_req_count = mig_req_count - 1")
        .execute(&mut *tx)
        .await?;

    if success {
        let dest: Option<(i32,)> = sqlx::query_as(
            "SELECT dest_nodeid FROM shard_migration \
             WHERE group_id = $1 AND status = 'MIGRATION_STARTED' \
             ORDER BY modified_at DESC LIMIT 1",
        )
        .bind(groupid)
        .fetch_optional(&mut *tx)
        .await?;
        let dest_nodeid = dest.ok_or(BrokerError::MigrationInvalidNodeId)?.0;

        sqlx::query(
            "UPDATE shard_migration SET status = 'COMPLETE', modified_at = now() \
             WHERE group_id = $1 AND status = 'MIGRATION_STARTED'",
        )
        .bind(groupid)
        .execute(&mut *tx)
        .await?;

        let version = controller.next_version(&mut tx, "groupid_last_ver").await?;
        sqlx::query("UPDATE shard_groupid SET current_node_id = $1, version = $2 WHERE group_id = $3")
            .bind(dest_nodeid)
            .bind(version)
            .bind(groupid)
            .execute(&mut *tx)
            .await?;
    } else {
        sqlx::query(
            "UPDATE shard_migration SET status = 'FAILED', modified_at = now() \
             WHERE group_id = $1 AND status = 'MIGRATION_STARTED'",
        )
        .bind(groupid)
        .execute(&mut *tx)
        .await?;
        crate::core::metrics::MIGRATION_COMPENSATIONS_TOTAL.inc();
    }

    tx.commit().await?;
    controller.counters.mig_req_count.fetch_sub(1, Ordering::Relaxed);
    controller.wake_orchestrator();
    Ok(())
}

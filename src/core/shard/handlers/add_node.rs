// src/core/shard/handlers/add_node.rs

//! `ADD_NODE` (spec §4.6): two-phase schema + global-table migration with
//! compensation on either phase's failure.

use crate::core::errors::BrokerError;
use crate::core::metastore::schema::{
    NODE_ROW_STATUS_COMPLETE, NODE_ROW_STATUS_SCHEMA_COMPLETE, NODE_STATUS_ALL_VALID,
    NODE_STATUS_EXIST_INVALID, ShardNodeRow,
};
use crate::core::protocol::NodeSpec;
use crate::core::shard::controller::ShardController;
use tracing::{error, info, warn};

pub async fn run(controller: &ShardController, node: &NodeSpec) -> Result<(), BrokerError> {
    if !controller.is_all_valid().await {
        return Err(BrokerError::NodeAddInProgress);
    }

    let existing: Vec<ShardNodeRow> = sqlx::query_as("SELECT * FROM shard_node ORDER BY node_id")
        .fetch_all(controller.metastore.pool())
        .await?;

    if existing.iter().any(|n| n.node_id == node.node_id) {
        return Err(BrokerError::NodeInfoExist);
    }

    let lowest = existing
        .iter()
        .map(|n| n.node_id)
        .min()
        .ok_or(BrokerError::NodeInfoNotExist)?;

    if node.node_id <= lowest {
        return Err(BrokerError::NodeAddInvalidSrcNode);
    }

    let pending: (i64,) = sqlx::query_as(
        "SELECT count(*) FROM shard_migration WHERE status IN ('SCHEDULED', 'MIGRATOR_RUN', 'MIGRATION_STARTED')",
    )
    .fetch_one(controller.metastore.pool())
    .await?;
    if pending.0 > 0 {
        return Err(BrokerError::RebalanceRunning);
    }

    // Phase (a): schema migration.
    controller.set_node_status(NODE_STATUS_EXIST_INVALID).await;
    {
        let mut tx = controller.metastore.begin().await?;
        sqlx::query("UPDATE shard_db SET node_status = $1")
            .bind(NODE_STATUS_EXIST_INVALID)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    info!(node_id = node.node_id, src = lowest, "add_node: launching schema migration");
    if let Err(e) = controller.launcher.run_schema_migration(lowest, node).await {
        error!(node_id = node.node_id, error = %e, "schema migration failed, rolling back");
        controller.set_node_status(NODE_STATUS_ALL_VALID).await;
        let _ = sqlx::query("UPDATE shard_db SET node_status = $1")
            .bind(NODE_STATUS_ALL_VALID)
            .execute(controller.metastore.pool())
            .await;
        return Err(BrokerError::SchemaMigrationFail(e.to_string()));
    }

    let version = {
        let mut tx = controller.metastore.begin().await?;
        let version = controller.next_version(&mut tx, "node_last_ver").await?;
        sqlx::query(
            "INSERT INTO shard_node (node_id, local_dbname, host, port, status, version) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(node.node_id)
        .bind(&node.local_dbname)
        .bind(&node.host)
        .bind(node.port)
        .bind(NODE_ROW_STATUS_SCHEMA_COMPLETE)
        .bind(version)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        version
    };

    // Phase (b): global-table migration.
    info!(node_id = node.node_id, "add_node: launching global-table migration");
    if let Err(e) = controller.launcher.run_global_table_migration(lowest, node).await {
        error!(node_id = node.node_id, error = %e, "global-table migration failed, compensating");
        if let Err(rollback_err) = node_add_fail(controller, node.node_id).await {
            warn!(node_id = node.node_id, error = %rollback_err, "compensation for failed add_node also failed");
        }
        return Err(BrokerError::GlobalTableMigrationFail(e.to_string()));
    }

    let mut tx = controller.metastore.begin().await?;
    sqlx::query("UPDATE shard_node SET status = $1 WHERE node_id = $2")
        .bind(NODE_ROW_STATUS_COMPLETE)
        .bind(node.node_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE shard_db SET node_status = $1")
        .bind(NODE_STATUS_ALL_VALID)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    controller.set_node_status(NODE_STATUS_ALL_VALID).await;
    let _ = version;
    Ok(())
}

/// Bounded recovery path: deletes the partial node row and restores
/// `node_status`. Per spec §9's "log and proceed" adopted semantics, a
/// failure here is logged and counted rather than retried indefinitely.
async fn node_add_fail(controller: &ShardController, node_id: i32) -> Result<(), BrokerError> {
    let result: Result<(), BrokerError> = async {
        let mut tx = controller.metastore.begin().await?;
        sqlx::query("DELETE FROM shard_node WHERE node_id = $1")
            .bind(node_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE shard_db SET node_status = $1")
            .bind(NODE_STATUS_ALL_VALID)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
    .await;

    if result.is_err() {
        crate::core::metrics::COMPENSATION_FAILURES_TOTAL.inc();
    }
    controller.set_node_status(NODE_STATUS_ALL_VALID).await;
    result
}

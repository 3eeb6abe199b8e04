// src/core/shard/handlers/drop_node.rs

//! `DROP_NODE` (spec §4.6).

use crate::core::errors::BrokerError;
use crate::core::shard::controller::ShardController;
use tracing::info;

pub async fn run(controller: &ShardController, node_id: i32, drop_all: bool) -> Result<(), BrokerError> {
    if !controller.is_all_valid().await {
        return Err(BrokerError::NodeAddInProgress);
    }

    let mut tx = controller.metastore.begin().await?;

    let still_referenced: (i64,) =
        sqlx::query_as("SELECT count(*) FROM shard_groupid WHERE current_node_id = $1")
            .bind(node_id)
            .fetch_one(&mut *tx)
            .await?;
    if still_referenced.0 > 0 {
        tx.rollback().await?;
        return Err(BrokerError::NodeInUse);
    }

    let affected = if drop_all {
        sqlx::query("DELETE FROM shard_node WHERE node_id = $1")
            .bind(node_id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
    } else {
        let rows = sqlx::query("DELETE FROM shard_node WHERE node_id = $1 RETURNING node_id")
            .bind(node_id)
            .fetch_all(&mut *tx)
            .await?;
        rows.len() as u64
    };

    if affected == 0 {
        tx.rollback().await?;
        return Err(BrokerError::NodeInfoNotExist);
    }

    controller.next_version(&mut tx, "node_last_ver").await?;
    tx.commit().await?;

    info!(node_id, "drop_node: notifying local-mgmt sync");
    controller.wake_orchestrator();
    Ok(())
}

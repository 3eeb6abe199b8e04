// src/core/shard/handlers/init.rs

//! `INIT` (spec §4.6): creates the meta-tables, seeds `shard_groupid` by
//! assigning contiguous ranges of groups to the initial nodes, inserts the
//! node rows.

use crate::core::errors::BrokerError;
use crate::core::metastore::schema::NODE_ROW_STATUS_COMPLETE;
use crate::core::protocol::NodeSpec;
use crate::core::shard::controller::ShardController;

pub async fn run(
    controller: &ShardController,
    dba_passwd: &str,
    global_dbname: &str,
    groupid_count: i32,
    init_nodes: &[NodeSpec],
) -> Result<(), BrokerError> {
    let _ = dba_passwd; // the meta-user create statement is storage-specific and out of scope
    if groupid_count <= 0 || init_nodes.is_empty() {
        return Err(BrokerError::InvalidArgument(
            "groupid_count and init_nodes must be non-empty/positive".into(),
        ));
    }

    let mut deduped: Vec<NodeSpec> = Vec::new();
    for node in init_nodes {
        if !deduped.iter().any(|n| n.node_id == node.node_id) {
            deduped.push(node.clone());
        }
    }
    deduped.sort_by_key(|n| n.node_id);

    controller.metastore.create_schema().await?;

    let mut tx = controller.metastore.begin().await?;

    sqlx::query(
        "INSERT INTO shard_db (global_dbname, groupid_count, groupid_last_ver, node_last_ver) \
         VALUES ($1, $2, 1, $3) \
         ON CONFLICT (global_dbname) DO UPDATE SET groupid_count = EXCLUDED.groupid_count",
    )
    .bind(global_dbname)
    .bind(groupid_count)
    .bind(deduped.len() as i64)
    .execute(&mut *tx)
    .await?;

    let node_count = deduped.len() as i32;
    let groups_per_node = groupid_count.div_ceil(node_count);

    let mut group_id = 1;
    for (idx, node) in deduped.iter().enumerate() {
        let version = (idx + 1) as i64;
        sqlx::query(
            "INSERT INTO shard_node (node_id, local_dbname, host, port, status, version) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(node.node_id)
        .bind(&node.local_dbname)
        .bind(&node.host)
        .bind(node.port)
        .bind(NODE_ROW_STATUS_COMPLETE)
        .bind(version)
        .execute(&mut *tx)
        .await?;

        let end = if idx as i32 == node_count - 1 {
            groupid_count
        } else {
            (group_id + groups_per_node - 1).min(groupid_count)
        };
        while group_id <= end {
            sqlx::query(
                "INSERT INTO shard_groupid (group_id, current_node_id, version) VALUES ($1, $2, 1)",
            )
            .bind(group_id)
            .bind(node.node_id)
            .execute(&mut *tx)
            .await?;
            group_id += 1;
        }
    }

    tx.commit().await?;
    controller.set_node_status(crate::core::metastore::schema::NODE_STATUS_ALL_VALID).await;
    Ok(())
}

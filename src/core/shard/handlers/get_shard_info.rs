// src/core/shard/handlers/get_shard_info.rs

//! `GET_SHARD_INFO` (spec §4.6): served off a separate queue from the admin
//! handlers above; answers from cache unless the client's `created_at`
//! disagrees with the server's, in which case both caches are forced to
//! refresh.

use crate::core::errors::BrokerError;
use crate::core::shard::controller::ShardController;

pub struct ShardInfoResponse {
    pub server_created_at: i64,
    pub node_info_all: Vec<u8>,
    pub groupid_snapshot: Vec<u8>,
    pub node_state: Vec<u8>,
}

pub async fn run(
    controller: &ShardController,
    clt_node_ver: i64,
    clt_groupid_ver: i64,
    clt_created_at: i64,
) -> Result<ShardInfoResponse, BrokerError> {
    let server_created_at = controller.cache.created_at();
    let created_at_mismatch = clt_created_at != 0 && clt_created_at != server_created_at;

    let node_stale = created_at_mismatch || clt_node_ver > controller.cache.node_version();
    let groupid_stale = created_at_mismatch || clt_groupid_ver > controller.cache.groupid_version();

    if node_stale || groupid_stale {
        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT node_last_ver, groupid_last_ver FROM shard_db")
                .fetch_optional(controller.metastore.pool())
                .await?;
        let (node_last_ver, groupid_last_ver) = row.ok_or(BrokerError::ShardInfoNotAvailable)?;
        controller
            .cache
            .refresh(&controller.metastore, node_last_ver, groupid_last_ver)
            .await?;
    }

    let clt_groupid_ver = if created_at_mismatch { 0 } else { clt_groupid_ver };

    Ok(ShardInfoResponse {
        server_created_at,
        node_info_all: controller.cache.node_info_all(),
        groupid_snapshot: controller.cache.groupid_snapshot(clt_groupid_ver),
        node_state: controller.cache.node_state_vector(),
    })
}

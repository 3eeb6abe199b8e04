// src/core/shard/sync.rs

//! Local-mgmt sync loop (spec §4.8, last paragraph): periodically fans
//! `SYNC_SHARD_MGMT_INFO` out to every node's local-mgmt broker so each one
//! learns this shard-mgmt broker's bound port, and records the host name and
//! failover state each node reports back into the shard-info cache that
//! `GET_SHARD_INFO` serves from.

use super::controller::ShardController;
use crate::core::errors::BrokerError;
use crate::core::protocol::{ManagementClientCodec, ManagementRequest};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::debug;

/// Drives the sync loop at a fixed interval until shutdown. A node that
/// can't be reached this pass simply keeps its last-known cached state;
/// there's always a next pass.
pub async fn run(controller: Arc<ShardController>, shard_mgmt_port: i32, interval: Duration, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {}
        }
        run_once(&controller, shard_mgmt_port).await;
    }
}

async fn run_once(controller: &ShardController, shard_mgmt_port: i32) {
    for (node_id, host, port) in controller.cache.node_endpoints() {
        let addr = format!("{host}:{port}");
        match sync_one(&addr, shard_mgmt_port).await {
            Ok((host_name, ha_state)) => {
                controller.cache.update_node_state(node_id, host_name, ha_state);
            }
            Err(e) => {
                debug!(node_id, %addr, error = %e, "sync_shard_mgmt_info failed");
            }
        }
    }
}

async fn sync_one(addr: &str, shard_mgmt_port: i32) -> Result<(String, String), BrokerError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| BrokerError::Communication(format!("local-mgmt connect {addr}: {e}")))?;
    let mut framed = Framed::new(stream, ManagementClientCodec::default());

    framed
        .send(ManagementRequest::SyncShardMgmtInfo { port: shard_mgmt_port, node_hosts: vec![] })
        .await?;

    match framed.next().await {
        Some(Ok(response)) if response.error_code == 0 => {
            let host_name = response
                .bodies
                .first()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            let ha_state = response
                .bodies
                .get(1)
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            Ok((host_name, ha_state))
        }
        Some(Ok(response)) => Err(BrokerError::Communication(format!(
            "local-mgmt returned error code {}",
            response.error_code
        ))),
        Some(Err(e)) => Err(e),
        None => Err(BrokerError::Communication("local-mgmt closed connection".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_one_rejects_unreachable_host() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(sync_one("127.0.0.1:1", 12345));
        assert!(result.is_err());
    }
}

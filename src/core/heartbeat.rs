// src/core/heartbeat.rs

//! Heartbeat client: the calls the core makes into the heartbeat daemon,
//! an external collaborator reached via RPC (spec §1 Scope, §4.8). We
//! specify only the query `SYNC_SHARD_MGMT_INFO` needs — host name and
//! failover state — not the failure-detection algorithm itself, so the
//! daemon is addressed with the same framed request/response protocol the
//! rest of this crate speaks rather than a bespoke wire format.

use crate::core::errors::BrokerError;
use crate::core::protocol::{ManagementClientCodec, ManagementRequest};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

/// A node's reported failover role, as returned by the heartbeat daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaState {
    Master,
    Slave,
    Unknown,
}

impl HaState {
    fn parse(s: &str) -> Self {
        match s {
            "master" => HaState::Master,
            "slave" => HaState::Slave,
            _ => HaState::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HaState::Master => "master",
            HaState::Slave => "slave",
            HaState::Unknown => "unknown",
        }
    }
}

pub struct HeartbeatClient {
    framed: Framed<TcpStream, ManagementClientCodec>,
}

impl HeartbeatClient {
    pub async fn connect(addr: &str) -> Result<Self, BrokerError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| BrokerError::Communication(format!("heartbeat connect {addr}: {e}")))?;
        Ok(Self {
            framed: Framed::new(stream, ManagementClientCodec::default()),
        })
    }

    /// Queries the daemon's view of this host's short name and current
    /// failover role, piggy-backing on `SYNC_SHARD_MGMT_INFO`'s two-body
    /// response shape (host name, ha state) that `LocalMgmtService` already
    /// answers with.
    pub async fn ha_state(&mut self) -> Result<(String, HaState), BrokerError> {
        self.framed
            .send(ManagementRequest::SyncShardMgmtInfo { port: 0, node_hosts: vec![] })
            .await?;
        match self.framed.next().await {
            Some(Ok(response)) if response.error_code == 0 => {
                let host_name = response
                    .bodies
                    .first()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                let state = response
                    .bodies
                    .get(1)
                    .map(|b| HaState::parse(&String::from_utf8_lossy(b)))
                    .unwrap_or(HaState::Unknown);
                Ok((host_name, state))
            }
            Some(Ok(response)) => Err(BrokerError::Communication(format!(
                "heartbeat daemon returned error code {}",
                response.error_code
            ))),
            Some(Err(e)) => Err(e),
            None => Err(BrokerError::Communication("heartbeat daemon closed connection".into())),
        }
    }
}

// src/core/localmgmt/service.rs

//! Local Management Service (C8, spec §4.8): the small RPC surface bound to
//! a local-mgmt broker, serviced by up to four concurrent worker tasks.

use super::launch::{Launcher, ProcessId};
use crate::core::errors::BrokerError;
use crate::core::heartbeat::HeartbeatClient;
use crate::core::protocol::{ManagementCodec, ManagementRequest, ManagementResponse};
use futures::{SinkExt, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

/// Bounds total concurrent RPC handling to four in-flight requests across
/// all connections (spec §5: "Local-mgmt brokers run four RPC workers").
const MAX_CONCURRENT_RPCS: usize = 4;

pub struct LocalMgmtService {
    pub launcher: Launcher,
    pub conf_dir: PathBuf,
    pub heartbeat_addr: Option<String>,
    semaphore: Arc<Semaphore>,
}

impl LocalMgmtService {
    pub fn new(launcher: Launcher, conf_dir: impl Into<PathBuf>, heartbeat_addr: Option<String>) -> Self {
        Self {
            launcher,
            conf_dir: conf_dir.into(),
            heartbeat_addr,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_RPCS)),
        }
    }

    fn conf_path(&self, name: &str) -> Result<PathBuf, BrokerError> {
        let path = Path::new(name);
        if path.is_absolute() || name.contains("..") {
            return Err(BrokerError::InvalidArgument(format!("invalid conf path {name}")));
        }
        Ok(self.conf_dir.join(path))
    }
}

pub async fn run(service: Arc<LocalMgmtService>, listener: TcpListener, mut shutdown_rx: broadcast::Receiver<()>) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let Ok((socket, addr)) = accepted else { continue };
                let service = service.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(service, socket).await {
                        debug!(%addr, error = %e, "local-mgmt connection closed");
                    }
                });
            }
        }
    }
}

async fn handle_connection(service: Arc<LocalMgmtService>, socket: TcpStream) -> Result<(), BrokerError> {
    let mut framed = Framed::new(socket, ManagementCodec::default());
    while let Some(decoded) = framed.next().await {
        let decoded = decoded?;
        let _permit = service.semaphore.acquire().await.expect("semaphore never closed");
        let response = dispatch(&service, decoded.request).await;
        framed.send(response).await?;
    }
    Ok(())
}

async fn dispatch(service: &LocalMgmtService, request: ManagementRequest) -> ManagementResponse {
    let result = handle_one(service, request).await;
    match result {
        Ok(bodies) => ManagementResponse::ok(bodies),
        Err(e) => ManagementResponse::err(&e),
    }
}

async fn handle_one(service: &LocalMgmtService, request: ManagementRequest) -> Result<Vec<bytes::Bytes>, BrokerError> {
    match request {
        ManagementRequest::ReadRyeFile { path } => {
            let full = service.conf_path(&path)?;
            let contents = tokio::fs::read(&full).await?;
            Ok(vec![contents.into()])
        }
        ManagementRequest::WriteRyeConf { contents } => {
            let full = service.conf_path("rye-shm.conf")?;
            tokio::fs::write(&full, contents).await?;
            Ok(vec![])
        }
        ManagementRequest::UpdateConf { key, value } => {
            update_conf_line(service, &key, Some(&value)).await?;
            Ok(vec![])
        }
        ManagementRequest::DeleteConf { key } => {
            update_conf_line(service, &key, None).await?;
            Ok(vec![])
        }
        ManagementRequest::GetConf { key } => {
            let full = service.conf_path("rye-shm.conf")?;
            let contents = tokio::fs::read_to_string(&full).await.unwrap_or_default();
            let value = contents
                .lines()
                .find_map(|line| line.strip_prefix(&format!("{key}=")))
                .unwrap_or("")
                .to_string();
            Ok(vec![value.into_bytes().into()])
        }
        ManagementRequest::BrAclReload => {
            // ACL source lives outside this crate's scope; acknowledging the
            // request is the extent of the contract here.
            Ok(vec![])
        }
        ManagementRequest::LaunchProcess { process_id, args } => {
            let process_id = ProcessId::from_wire(process_id)?;
            let handle = service.launcher.launch(process_id, &args).await?;
            Ok(vec![handle.pid.to_be_bytes().to_vec().into()])
        }
        ManagementRequest::SyncShardMgmtInfo { port, node_hosts } => {
            let _ = (port, node_hosts);
            let (host_name, ha_state) = match &service.heartbeat_addr {
                Some(addr) => match HeartbeatClient::connect(addr).await {
                    Ok(mut client) => client.ha_state().await.unwrap_or_else(|_| ("".into(), crate::core::heartbeat::HaState::Unknown)),
                    Err(e) => {
                        warn!(error = %e, "heartbeat query failed during sync");
                        ("".into(), crate::core::heartbeat::HaState::Unknown)
                    }
                },
                None => ("".into(), crate::core::heartbeat::HaState::Unknown),
            };
            Ok(vec![host_name.into_bytes().into(), ha_state.as_str().as_bytes().to_vec().into()])
        }
        _ => Err(BrokerError::InvalidOpcode),
    }
}

async fn update_conf_line(service: &LocalMgmtService, key: &str, value: Option<&str>) -> Result<(), BrokerError> {
    let full = service.conf_path("rye-shm.conf")?;
    let contents = tokio::fs::read_to_string(&full).await.unwrap_or_default();
    let mut lines: Vec<String> = contents
        .lines()
        .filter(|line| !line.starts_with(&format!("{key}=")))
        .map(|s| s.to_string())
        .collect();
    if let Some(value) = value {
        lines.push(format!("{key}={value}"));
    }
    tokio::fs::write(&full, lines.join("\n")).await?;
    Ok(())
}

// src/core/shard/mod.rs

//! Shard Controller (C6) and Migration Orchestrator (C7): the
//! shard-management admin queue (which also serves `GET_SHARD_INFO` over
//! the broker's single bound port) and the background scheduler that
//! drives planned migrations (spec §4.6, §4.7).

pub mod cache;
pub mod controller;
pub mod handlers;
pub mod orchestrator;
pub mod sync;

pub use controller::ShardController;

use crate::core::errors::BrokerError;
use crate::core::protocol::{ManagementCodec, ManagementRequest, ManagementResponse};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Runs the shard-management queue: one worker task per connection,
/// dispatching every shard-mgmt opcode including `GET_SHARD_INFO` over the
/// broker's single bound port (spec §6: "Each broker binds one"), with the
/// wait-for-next-request pattern implemented for the `*_START`/`*_END`
/// pairs (spec §9 "Long-running operations that span two client messages").
pub async fn run_admin_worker(
    controller: Arc<ShardController>,
    listener: TcpListener,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                info!("admin worker shutting down");
                break;
            }
            accepted = listener.accept() => {
                let Ok((socket, addr)) = accepted else { continue };
                let controller = controller.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_admin_connection(controller, socket).await {
                        debug!(%addr, error = %e, "admin connection closed");
                    }
                });
            }
        }
    }
}

/// One admin connection's lifetime: ordinary requests get a single
/// request/response round trip; `*_START` requests commit, then the same
/// task blocks on the next frame (bounded by the request's own
/// `timeout_sec`) looking for the matching `*_END`, running compensation if
/// the client disconnects or times out first.
async fn handle_admin_connection(controller: Arc<ShardController>, socket: TcpStream) -> Result<(), BrokerError> {
    let mut framed = Framed::new(socket, ManagementCodec::default());

    while let Some(decoded) = framed.next().await {
        let decoded = decoded?;
        match decoded.request {
            ManagementRequest::GetShardInfo { clt_node_ver, clt_groupid_ver, clt_created_at, .. } => {
                let response = match handlers::get_shard_info::run(&controller, clt_node_ver, clt_groupid_ver, clt_created_at).await {
                    Ok(r) => {
                        let header = r.server_created_at.to_be_bytes().to_vec();
                        ManagementResponse::ok(vec![header.into(), r.node_info_all.into(), r.groupid_snapshot.into(), r.node_state.into()])
                    }
                    Err(e) => ManagementResponse::err(&e),
                };
                framed.send(response).await?;
            }
            ManagementRequest::Init { dba_passwd, global_dbname, groupid_count, init_nodes } => {
                let result = handlers::init::run(&controller, &dba_passwd, &global_dbname, groupid_count, &init_nodes).await;
                reply(&mut framed, result).await?;
            }
            ManagementRequest::AddNode { node } => {
                let result = handlers::add_node::run(&controller, &node).await;
                reply(&mut framed, result).await?;
            }
            ManagementRequest::DropNode { node_id, drop_all } => {
                let result = handlers::drop_node::run(&controller, node_id, drop_all).await;
                reply(&mut framed, result).await?;
            }
            ManagementRequest::MigrationStart { groupid, dest_nodeid, num_shard_keys, timeout_sec } => {
                let result = handlers::migration::start(&controller, groupid, dest_nodeid, num_shard_keys, timeout_sec).await;
                reply(&mut framed, result).await?;
                if result.is_ok() {
                    await_migration_end(&controller, &mut framed, groupid, timeout_sec).await?;
                }
            }
            ManagementRequest::DdlStart { timeout_sec } => {
                let result = handlers::ddl::start(&controller, timeout_sec).await;
                reply(&mut framed, result).await?;
                if result.is_ok() {
                    await_ddl_end(&controller, &mut framed, timeout_sec).await?;
                }
            }
            ManagementRequest::GcStart => {
                let result = handlers::gc::start(&controller).await;
                reply(&mut framed, result).await?;
                if result.is_ok() {
                    await_gc_end(&controller, &mut framed).await?;
                }
            }
            ManagementRequest::RebalanceReq { src, dest, empty_node, ignore_prev_fail } => {
                match handlers::rebalance::run(&controller, &src, &dest, empty_node, ignore_prev_fail).await {
                    Ok(count) => framed.send(ManagementResponse::ok(vec![count.to_be_bytes().to_vec().into()])).await?,
                    Err(e) => framed.send(ManagementResponse::err(&e)).await?,
                }
            }
            ManagementRequest::RebalanceJobCount => {
                match handlers::rebalance::job_count(&controller, "SCHEDULED").await {
                    Ok(count) => framed.send(ManagementResponse::ok(vec![count.to_be_bytes().to_vec().into()])).await?,
                    Err(e) => framed.send(ManagementResponse::err(&e)).await?,
                }
            }
            ManagementRequest::PingShardMgmt => {
                framed.send(ManagementResponse::ok(vec![])).await?;
            }
            // MIGRATION_END/DDL_END/GC_END arriving outside the wait-for-next
            // window (e.g. duplicate or stray) have nothing to match against.
            ManagementRequest::MigrationEnd { .. } | ManagementRequest::DdlEnd | ManagementRequest::GcEnd => {
                framed.send(ManagementResponse::err(&BrokerError::InvalidArgument("no pending operation".into()))).await?;
            }
            _ => {
                framed.send(ManagementResponse::err(&BrokerError::InvalidOpcode)).await?;
            }
        }
    }
    Ok(())
}

async fn reply<T>(framed: &mut Framed<TcpStream, ManagementCodec>, result: Result<T, BrokerError>) -> Result<(), BrokerError> {
    let response = match result {
        Ok(_) => ManagementResponse::ok(vec![]),
        Err(e) => ManagementResponse::err(&e),
    };
    framed.send(response).await
}

async fn await_migration_end(
    controller: &ShardController,
    framed: &mut Framed<TcpStream, ManagementCodec>,
    groupid: i32,
    timeout_sec: i32,
) -> Result<(), BrokerError> {
    let bound = Duration::from_secs(timeout_sec.max(1) as u64);
    match tokio::time::timeout(bound, framed.next()).await {
        Ok(Some(Ok(decoded))) => match decoded.request {
            ManagementRequest::MigrationEnd { success } => {
                let result = handlers::migration::end(controller, groupid, success).await;
                reply(framed, result).await
            }
            _ => {
                warn!(groupid, "expected MIGRATION_END, got a different opcode; compensating");
                handlers::migration::end(controller, groupid, false).await
            }
        },
        _ => {
            warn!(groupid, "client disconnected or timed out before MIGRATION_END; compensating");
            handlers::migration::end(controller, groupid, false).await
        }
    }
}

async fn await_ddl_end(
    controller: &ShardController,
    framed: &mut Framed<TcpStream, ManagementCodec>,
    timeout_sec: i32,
) -> Result<(), BrokerError> {
    let bound = Duration::from_secs(timeout_sec.max(1) as u64);
    match tokio::time::timeout(bound, framed.next()).await {
        Ok(Some(Ok(decoded))) if matches!(decoded.request, ManagementRequest::DdlEnd) => {
            let result = handlers::ddl::end(controller).await;
            reply(framed, result).await
        }
        _ => {
            info!("compensating missing DDL_END");
            handlers::ddl::compensate(controller).await
        }
    }
}

async fn await_gc_end(controller: &ShardController, framed: &mut Framed<TcpStream, ManagementCodec>) -> Result<(), BrokerError> {
    match framed.next().await {
        Some(Ok(decoded)) if matches!(decoded.request, ManagementRequest::GcEnd) => {
            let result = handlers::gc::end(controller).await;
            reply(framed, result).await
        }
        _ => {
            info!("compensating missing GC_END");
            handlers::gc::compensate(controller).await
        }
    }
}

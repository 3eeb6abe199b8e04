// src/core/dispatch/acceptor.rs

//! Per-broker accept loop (spec §4.3): accepts client connections, frames
//! one request off each, and enqueues `CAS_CONNECT` hand-offs onto the job
//! queue.

use crate::core::control::broker::BrokerHandle;
use crate::core::control::job_queue::JobEntry;
use crate::core::metrics;
use crate::core::protocol::{ManagementCodec, ManagementRequest};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Runs the accept loop for one broker over an already-bound TCP listener
/// (every broker role binds TCP uniformly here — see `DESIGN.md`).
pub async fn run(
    broker: Arc<BrokerHandle>,
    listener: TcpListener,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                info!(broker = %broker.name, "acceptor shutting down");
                break;
            }
            accepted = listener.accept() => {
                let (socket, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => { warn!(broker = %broker.name, error = %e, "accept failed"); continue; }
                };

                broker.counters.connections_received.fetch_add(1, Ordering::Relaxed);
                metrics::CONNECTIONS_RECEIVED_TOTAL.with_label_values(&[&broker.name]).inc();

                if broker.reject_client_flag.load(Ordering::Relaxed) {
                    broker.counters.jobs_rejected.fetch_add(1, Ordering::Relaxed);
                    metrics::JOBS_REJECTED_TOTAL.with_label_values(&[&broker.name]).inc();
                    debug!(broker = %broker.name, %addr, "reject_client_flag set, closing immediately");
                    continue;
                }

                let _ = socket.set_nodelay(true);

                let mut framed = Framed::new(socket, ManagementCodec::default());
                match framed.next().await {
                    Some(Ok(decoded)) => {
                        if matches!(decoded.request, ManagementRequest::CasConnect) {
                            let entry = JobEntry {
                                priority: 0,
                                socket: framed.into_inner(),
                                client_addr: addr,
                                received_at: Instant::now(),
                                client_version: decoded.version,
                            };
                            if broker.job_queue.try_push(entry).await.is_err() {
                                broker.counters.jobs_rejected.fetch_add(1, Ordering::Relaxed);
                                metrics::JOBS_REJECTED_TOTAL.with_label_values(&[&broker.name]).inc();
                                warn!(broker = %broker.name, %addr, "job queue full, rejecting");
                            }
                        } else {
                            debug!(broker = %broker.name, %addr, ?decoded.request, "non-connect opcode on accept socket");
                        }
                    }
                    Some(Err(e)) => {
                        warn!(broker = %broker.name, %addr, error = %e, "invalid opcode on accept, closing");
                    }
                    None => {}
                }
            }
        }
    }
}

// src/core/shard/handlers/gc.rs

//! `GC_START` / `GC_END` (spec §4.6): mirrors DDL but refuses to start
//! while any migration is in flight — no queueing.

use crate::core::errors::BrokerError;
use crate::core::shard::controller::ShardController;
use std::sync::atomic::Ordering;

pub async fn start(controller: &ShardController) -> Result<(), BrokerError> {
    if controller.counters.mig_req_count.load(Ordering::Relaxed) > 0 {
        return Err(BrokerError::RebalanceRunning);
    }
    sqlx::query("UPDATE shard_db SET gc_req_count = gc_req_count + 1")
        .execute(controller.metastore.pool())
        .await?;
    controller.counters.gc_req_count.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

pub async fn end(controller: &ShardController) -> Result<(), BrokerError> {
    sqlx::query("UPDATE shard_db SET gc_req_count = gc_req_count - 1")
        .execute(controller.metastore.pool())
        .await?;
    controller.counters.gc_req_count.fetch_sub(1, Ordering::Relaxed);
    Ok(())
}

/// Runs in place of a missing `GC_END` when the client disconnects first.
pub async fn compensate(controller: &ShardController) -> Result<(), BrokerError> {
    end(controller).await?;
    crate::core::metrics::GC_COMPENSATIONS_TOTAL.inc();
    Ok(())
}

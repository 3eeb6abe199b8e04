// src/core/shard/handlers/ddl.rs

//! `DDL_START` / `DDL_END` (spec §4.6): same wait-for-next-request pattern
//! as migration, mutually exclusive with nothing but queued behind
//! in-flight migrations.

use crate::core::errors::BrokerError;
use crate::core::shard::controller::ShardController;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::time::sleep;

const QUEUE_POLL: Duration = Duration::from_millis(50);

pub async fn start(controller: &ShardController, timeout_sec: i32) -> Result<(), BrokerError> {
    let deadline = Instant::now() + Duration::from_secs(timeout_sec.max(0) as u64);
    loop {
        if controller.counters.mig_req_count.load(Ordering::Relaxed) == 0 {
            break;
        }
        if Instant::now() >= deadline {
            return Err(BrokerError::RequestTimeout);
        }
        sleep(QUEUE_POLL).await;
    }

    sqlx::query("UPDATE shard_db SET ddl_req_count = ddl_req_count + 1")
        .execute(controller.metastore.pool())
        .await?;
    controller.counters.ddl_req_count.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

pub async fn end(controller: &ShardController) -> Result<(), BrokerError> {
    sqlx::query("UPDATE shard_db SET ddl_req_count = ddl_req_count - 1")
        .execute(controller.metastore.pool())
        .await?;
    controller.counters.ddl_req_count.fetch_sub(1, Ordering::Relaxed);
    Ok(())
}

/// Runs in place of a missing `DDL_END` when the client disconnects before
/// sending one (spec §6, scenario E6).
pub async fn compensate(controller: &ShardController) -> Result<(), BrokerError> {
    end(controller).await?;
    crate::core::metrics::DDL_COMPENSATIONS_TOTAL.inc();
    Ok(())
}

// src/core/shard/handlers/rebalance.rs

//! `REBALANCE_REQ` / `REBALANCE_JOB_COUNT` (spec §4.6).

use crate::core::errors::BrokerError;
use crate::core::shard::controller::ShardController;
use rand::seq::SliceRandom;
use rand::{Rng, thread_rng};

struct Plan {
    group_id: i32,
    src_nodeid: i32,
    dest_nodeid: i32,
}

pub async fn run(
    controller: &ShardController,
    src: &[i32],
    dest: &[i32],
    empty_node: bool,
    ignore_prev_fail: bool,
) -> Result<i64, BrokerError> {
    if controller.rebalance_running.swap(true, std::sync::atomic::Ordering::AcqRel) {
        return Err(BrokerError::RebalanceRunning);
    }
    let result = run_inner(controller, src, dest, empty_node, ignore_prev_fail).await;
    controller.rebalance_running.store(false, std::sync::atomic::Ordering::Release);
    result
}

async fn run_inner(
    controller: &ShardController,
    src: &[i32],
    dest: &[i32],
    empty_node: bool,
    ignore_prev_fail: bool,
) -> Result<i64, BrokerError> {
    if dest.is_empty() {
        return Err(BrokerError::InvalidArgument("dest set must not be empty".into()));
    }

    let known_nodes: Vec<i32> = sqlx::query_scalar("SELECT node_id FROM shard_node")
        .fetch_all(controller.metastore.pool())
        .await?;

    for id in dest.iter().chain(src.iter()) {
        if !known_nodes.contains(id) {
            return Err(BrokerError::MigrationInvalidNodeId);
        }
    }

    if ignore_prev_fail {
        sqlx::query("DELETE FROM shard_migration WHERE status IN ('COMPLETE', 'FAILED')")
            .execute(controller.metastore.pool())
            .await?;
    }

    let assignments: Vec<(i32, i32)> =
        sqlx::query_as("SELECT group_id, current_node_id FROM shard_groupid")
            .fetch_all(controller.metastore.pool())
            .await?;

    let source_qualifies = |node: i32| -> bool {
        if empty_node {
            !dest.contains(&node)
        } else if src.is_empty() {
            !dest.contains(&node)
        } else {
            src.contains(&node)
        }
    };

    let mut rng_handle = thread_rng();
    let mut plans: Vec<Plan> = Vec::new();
    for (group_id, current_node_id) in assignments {
        if !source_qualifies(current_node_id) {
            continue;
        }
        let candidates: Vec<i32> = dest
            .iter()
            .copied()
            .filter(|d| *d != current_node_id)
            .collect();
        if candidates.is_empty() {
            continue;
        }
        let dest_nodeid = candidates[rng_handle.gen_range(0..candidates.len())];
        plans.push(Plan {
            group_id,
            src_nodeid: current_node_id,
            dest_nodeid,
        });
    }

    plans.shuffle(&mut rng_handle);

    let mut order_by_src: std::collections::HashMap<i32, i32> = std::collections::HashMap::new();
    let mut ordered: Vec<(i32, i32, Plan)> = plans
        .into_iter()
        .map(|p| {
            let order = order_by_src.entry(p.src_nodeid).or_insert(0);
            *order += 1;
            (p.src_nodeid, *order, p)
        })
        .collect();
    ordered.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    let mut tx = controller.metastore.begin().await?;
    for (_, order, plan) in &ordered {
        sqlx::query(
            "INSERT INTO shard_migration (group_id, src_nodeid, dest_nodeid, status, order_in_source) \
             VALUES ($1, $2, $3, 'SCHEDULED', $4)",
        )
        .bind(plan.group_id)
        .bind(plan.src_nodeid)
        .bind(plan.dest_nodeid)
        .bind(*order)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    controller.wake_orchestrator();
    Ok(ordered.len() as i64)
}

pub async fn job_count(controller: &ShardController, status: &str) -> Result<i64, BrokerError> {
    let row: (i64,) = sqlx::query_as("SELECT count(*) FROM shard_migration WHERE status = $1")
        .bind(status)
        .fetch_one(controller.metastore.pool())
        .await?;
    Ok(row.0)
}

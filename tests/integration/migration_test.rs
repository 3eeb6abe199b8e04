// tests/integration/migration_test.rs

use super::fixtures::TestContext;
use shardbroker::core::shard::handlers::{init, migration};
use std::sync::atomic::Ordering;

async fn init_two_node_cluster(ctx: &TestContext) {
    init::run(
        &ctx.controller,
        "dba-pw",
        "global_db",
        2,
        &[
            TestContext::node(1, "host-a", 30001),
            TestContext::node(2, "host-b", 30001),
        ],
    )
    .await
    .unwrap();
}

async fn schedule_migration(ctx: &TestContext, group_id: i32, src: i32, dest: i32) {
    sqlx::query(
        "INSERT INTO shard_migration (group_id, src_nodeid, dest_nodeid, status, order_in_source) \
         VALUES ($1, $2, $3, 'SCHEDULED', 0)",
    )
    .bind(group_id)
    .bind(src)
    .bind(dest)
    .execute(ctx.controller.metastore.pool())
    .await
    .unwrap();
}

#[tokio::test]
async fn migration_start_then_end_moves_group_ownership() {
    let ctx = TestContext::new().await;
    init_two_node_cluster(&ctx).await;
    // group 1 starts on node 1 (per init's contiguous assignment).
    schedule_migration(&ctx, 1, 1, 2).await;

    migration::start(&ctx.controller, 1, 2, 0, 5).await.unwrap();
    assert_eq!(ctx.controller.counters.mig_req_count.load(Ordering::Relaxed), 1);

    migration::end(&ctx.controller, 1, true).await.unwrap();
    assert_eq!(ctx.controller.counters.mig_req_count.load(Ordering::Relaxed), 0);

    let owner: (i32,) = sqlx::query_as("SELECT current_node_id FROM shard_groupid WHERE group_id = 1")
        .fetch_one(ctx.controller.metastore.pool())
        .await
        .unwrap();
    assert_eq!(owner.0, 2, "group 1 should now belong to node 2");

    let status: (String,) =
        sqlx::query_as("SELECT status FROM shard_migration WHERE group_id = 1 ORDER BY id DESC LIMIT 1")
            .fetch_one(ctx.controller.metastore.pool())
            .await
            .unwrap();
    assert_eq!(status.0, "COMPLETE");
}

/// A client that sends `MIGRATION_START` then disconnects without
/// `MIGRATION_END` leaves its migration row `FAILED` via the automatic
/// compensation path (`migration::end` called with `success = false` by
/// the admin loop's disconnect/timeout branch), and group ownership never
/// moves.
#[tokio::test]
async fn disconnect_before_migration_end_compensates_and_leaves_ownership_unchanged() {
    let ctx = TestContext::new().await;
    init_two_node_cluster(&ctx).await;
    schedule_migration(&ctx, 1, 1, 2).await;

    migration::start(&ctx.controller, 1, 2, 0, 5).await.unwrap();

    // Simulate the admin loop's compensation branch directly, as it would
    // run on client disconnect or request timeout.
    migration::end(&ctx.controller, 1, false).await.unwrap();

    assert_eq!(ctx.controller.counters.mig_req_count.load(Ordering::Relaxed), 0);

    let owner: (i32,) = sqlx::query_as("SELECT current_node_id FROM shard_groupid WHERE group_id = 1")
        .fetch_one(ctx.controller.metastore.pool())
        .await
        .unwrap();
    assert_eq!(owner.0, 1, "a compensated migration must not move group ownership");

    let status: (String,) =
        sqlx::query_as("SELECT status FROM shard_migration WHERE group_id = 1 ORDER BY id DESC LIMIT 1")
            .fetch_one(ctx.controller.metastore.pool())
            .await
            .unwrap();
    assert_eq!(status.0, "FAILED");
}

#[tokio::test]
async fn migration_start_rejects_same_source_and_destination() {
    let ctx = TestContext::new().await;
    init_two_node_cluster(&ctx).await;
    schedule_migration(&ctx, 1, 1, 1).await;

    let err = migration::start(&ctx.controller, 1, 1, 0, 5).await.unwrap_err();
    assert!(matches!(err, shardbroker::core::errors::BrokerError::MigrationInvalidNodeId));
}

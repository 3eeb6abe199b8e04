// tests/integration/ddl_gc_test.rs

use super::fixtures::TestContext;
use shardbroker::core::shard::handlers::{ddl, gc, init};
use std::sync::atomic::Ordering;

async fn init_single_node_cluster(ctx: &TestContext) {
    init::run(
        &ctx.controller,
        "dba-pw",
        "global_db",
        1,
        &[TestContext::node(1, "host-a", 30001)],
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn ddl_start_then_end_returns_counter_to_zero() {
    let ctx = TestContext::new().await;
    init_single_node_cluster(&ctx).await;

    ddl::start(&ctx.controller, 5).await.unwrap();
    assert_eq!(ctx.controller.counters.ddl_req_count.load(Ordering::Relaxed), 1);

    ddl::end(&ctx.controller).await.unwrap();
    assert_eq!(ctx.controller.counters.ddl_req_count.load(Ordering::Relaxed), 0);

    let row: (i32,) = sqlx::query_as("SELECT ddl_req_count FROM shard_db")
        .fetch_one(ctx.controller.metastore.pool())
        .await
        .unwrap();
    assert_eq!(row.0, 0);
}

/// A client that sends `DDL_START`, then disconnects before `DDL_END`:
/// `ddl_req_count` returns to its pre-call value via the compensation path.
#[tokio::test]
async fn disconnect_before_ddl_end_compensates_back_to_zero() {
    let ctx = TestContext::new().await;
    init_single_node_cluster(&ctx).await;

    ddl::start(&ctx.controller, 5).await.unwrap();
    ddl::compensate(&ctx.controller).await.unwrap();

    assert_eq!(ctx.controller.counters.ddl_req_count.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn gc_start_refuses_while_a_migration_is_in_flight() {
    let ctx = TestContext::new().await;
    init_single_node_cluster(&ctx).await;
    ctx.controller.counters.mig_req_count.fetch_add(1, Ordering::Relaxed);

    let err = gc::start(&ctx.controller).await.unwrap_err();
    assert!(matches!(err, shardbroker::core::errors::BrokerError::RebalanceRunning));
}

/// A client that sends `GC_START`, then disconnects before `GC_END`:
/// compensation runs in its place (spec scenario E6).
#[tokio::test]
async fn disconnect_before_gc_end_compensates_back_to_zero() {
    let ctx = TestContext::new().await;
    init_single_node_cluster(&ctx).await;

    gc::start(&ctx.controller).await.unwrap();
    gc::compensate(&ctx.controller).await.unwrap();

    assert_eq!(ctx.controller.counters.gc_req_count.load(Ordering::Relaxed), 0);
}

// tests/integration/shard_lifecycle_test.rs

use super::fixtures::TestContext;
use shardbroker::core::errors::BrokerError;
use shardbroker::core::shard::handlers::{add_node, init};

#[tokio::test]
async fn init_seeds_nodes_and_groups_across_the_initial_node_set() {
    let ctx = TestContext::new().await;
    let nodes = vec![
        TestContext::node(1, "host-a", 30001),
        TestContext::node(2, "host-b", 30001),
    ];

    init::run(&ctx.controller, "dba-pw", "global_db", 10, &nodes)
        .await
        .expect("init should succeed with a valid node set");

    let node_count: (i64,) = sqlx::query_as("SELECT count(*) FROM shard_node")
        .fetch_one(ctx.controller.metastore.pool())
        .await
        .unwrap();
    assert_eq!(node_count.0, 2);

    let group_count: (i64,) = sqlx::query_as("SELECT count(*) FROM shard_groupid")
        .fetch_one(ctx.controller.metastore.pool())
        .await
        .unwrap();
    assert_eq!(group_count.0, 10);

    // The first node (lowest id, sorted by init) owns group 1.
    let owner: (i32,) = sqlx::query_as("SELECT current_node_id FROM shard_groupid WHERE group_id = 1")
        .fetch_one(ctx.controller.metastore.pool())
        .await
        .unwrap();
    assert_eq!(owner.0, 1);

    assert!(ctx.controller.is_all_valid().await);
}

#[tokio::test]
async fn init_rejects_empty_node_list() {
    let ctx = TestContext::new().await;
    let err = init::run(&ctx.controller, "dba-pw", "global_db", 4, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::InvalidArgument(_)));
}

#[tokio::test]
async fn add_node_extends_the_cluster_and_flips_status_back_to_valid() {
    let ctx = TestContext::new().await;
    init::run(
        &ctx.controller,
        "dba-pw",
        "global_db",
        4,
        &[TestContext::node(1, "host-a", 30001)],
    )
    .await
    .unwrap();

    add_node::run(&ctx.controller, &TestContext::node(2, "host-b", 30001))
        .await
        .expect("add_node should succeed against a valid, idle cluster");

    assert!(ctx.controller.is_all_valid().await);
    let status: (String,) = sqlx::query_as("SELECT status FROM shard_node WHERE node_id = 2")
        .fetch_one(ctx.controller.metastore.pool())
        .await
        .unwrap();
    assert_eq!(status.0, "COMPLETE");
}

#[tokio::test]
async fn add_node_rejects_a_node_id_already_in_use() {
    let ctx = TestContext::new().await;
    init::run(
        &ctx.controller,
        "dba-pw",
        "global_db",
        4,
        &[TestContext::node(1, "host-a", 30001)],
    )
    .await
    .unwrap();

    let err = add_node::run(&ctx.controller, &TestContext::node(1, "host-a", 30002))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::NodeInfoExist));
}

#[tokio::test]
async fn add_node_rejects_a_node_id_below_the_existing_minimum() {
    let ctx = TestContext::new().await;
    init::run(
        &ctx.controller,
        "dba-pw",
        "global_db",
        4,
        &[TestContext::node(5, "host-a", 30001)],
    )
    .await
    .unwrap();

    let err = add_node::run(&ctx.controller, &TestContext::node(1, "host-b", 30001))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::NodeAddInvalidSrcNode));
}

// src/core/shard/controller.rs

//! Shard Controller (C6): cluster metadata mutations served off the
//! shard-management admin queue (spec §4.6). One `ShardController` is built
//! per shard-mgmt broker and shared by the admin worker, the local-mgmt sync
//! loop, and the migration orchestrator.

use super::cache::ShardInfoCache;
use crate::config::MigrationConfig;
use crate::core::errors::BrokerError;
use crate::core::metastore::MetaStoreClient;
use crate::core::metastore::schema::NODE_STATUS_ALL_VALID;
use crate::core::protocol::NodeSpec;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::{Mutex, Notify};

/// Launches the two helper processes `ADD_NODE` depends on (spec §4.6
/// two-phase add). The source calls into the local-mgmt launch RPC for
/// this; a real helper binary is out of scope here, so the default
/// implementation below always reports success, and deployments swap in a
/// `NodeMigrationLauncher` that actually shells out via
/// `core::localmgmt::launch`.
#[async_trait]
pub trait NodeMigrationLauncher: Send + Sync {
    async fn run_schema_migration(&self, src_node_id: i32, node: &NodeSpec) -> Result<(), BrokerError>;
    async fn run_global_table_migration(&self, src_node_id: i32, node: &NodeSpec) -> Result<(), BrokerError>;
}

/// No-op launcher used where no concrete helper binary is configured.
pub struct NoopMigrationLauncher;

#[async_trait]
impl NodeMigrationLauncher for NoopMigrationLauncher {
    async fn run_schema_migration(&self, _src_node_id: i32, _node: &NodeSpec) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn run_global_table_migration(&self, _src_node_id: i32, _node: &NodeSpec) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// Counters mirrored in memory for the fast queue/refuse checks handlers
/// need before touching the database (spec §4.6: "if pending DDL/GC
/// counters are non-zero..."). The database row remains authoritative;
/// these are refreshed alongside it within the same transaction.
#[derive(Default)]
pub struct ShardCounters {
    pub mig_req_count: AtomicI64,
    pub ddl_req_count: AtomicI64,
    pub gc_req_count: AtomicI64,
}

pub struct ShardController {
    pub metastore: Arc<MetaStoreClient>,
    pub migration_config: MigrationConfig,
    pub cache: ShardInfoCache,
    pub counters: ShardCounters,
    /// Mirrors `shard_db.node_status`; `ALL_VALID` unless an `ADD_NODE` is
    /// mid-flight.
    pub node_status: Mutex<String>,
    pub rebalance_running: AtomicBool,
    /// Woken whenever a handler commits a row the orchestrator should act
    /// on (spec §4.7: "one thread driven by a counter-cond").
    pub orchestrator_notify: Arc<Notify>,
    pub launcher: Arc<dyn NodeMigrationLauncher>,
}

impl ShardController {
    pub fn new(
        metastore: Arc<MetaStoreClient>,
        migration_config: MigrationConfig,
        launcher: Arc<dyn NodeMigrationLauncher>,
    ) -> Self {
        Self {
            metastore,
            migration_config,
            cache: ShardInfoCache::new(),
            counters: ShardCounters::default(),
            node_status: Mutex::new(NODE_STATUS_ALL_VALID.to_string()),
            rebalance_running: AtomicBool::new(false),
            orchestrator_notify: Arc::new(Notify::new()),
            launcher,
        }
    }

    pub async fn is_all_valid(&self) -> bool {
        *self.node_status.lock().await == NODE_STATUS_ALL_VALID
    }

    pub async fn set_node_status(&self, status: &str) {
        *self.node_status.lock().await = status.to_string();
    }

    /// Bumps `node_last_ver`/`groupid_last_ver` and returns the new value,
    /// used by handlers right before they commit a row that changes one of
    /// the two tables (spec invariant 2: the max of the two is strictly
    /// increasing on every commit that changes either table).
    pub async fn next_version(&self, tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, column: &str) -> Result<i64, BrokerError> {
        let row: (i64,) = sqlx::query_as(&format!(
            "UPDATE shard_db SET {column} = {column} + 1 RETURNING {column}"
        ))
        .fetch_one(&mut **tx)
        .await?;
        Ok(row.0)
    }

    pub fn wake_orchestrator(&self) {
        self.orchestrator_notify.notify_one();
    }
}

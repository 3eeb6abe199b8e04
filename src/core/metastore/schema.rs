// src/core/metastore/schema.rs

//! Shard metadata tables and their Rust row representations (spec §3).

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// `shard_db` — the singleton row describing the whole sharded space.
#[derive(Debug, Clone, FromRow)]
pub struct ShardDbRow {
    pub global_dbname: String,
    pub groupid_count: i32,
    pub groupid_last_ver: i64,
    pub node_last_ver: i64,
    pub mig_req_count: i32,
    pub ddl_req_count: i32,
    pub gc_req_count: i32,
    pub node_status: String,
    pub created_at: DateTime<Utc>,
}

pub const NODE_STATUS_ALL_VALID: &str = "ALL_VALID";
pub const NODE_STATUS_EXIST_INVALID: &str = "EXIST_INVALID";

/// `shard_node` — one row per node participating in the cluster.
#[derive(Debug, Clone, FromRow)]
pub struct ShardNodeRow {
    pub node_id: i32,
    pub local_dbname: String,
    pub host: String,
    pub port: i32,
    pub status: String,
    pub version: i64,
}

pub const NODE_ROW_STATUS_SCHEMA_COMPLETE: &str = "SCHEMA_COMPLETE";
pub const NODE_ROW_STATUS_COMPLETE: &str = "COMPLETE";

/// `shard_groupid` — the current owning node for every group.
#[derive(Debug, Clone, FromRow)]
pub struct ShardGroupidRow {
    pub group_id: i32,
    pub current_node_id: i32,
    pub version: i64,
}

/// `shard_migration` — one planned or in-flight rebalance task per group.
#[derive(Debug, Clone, FromRow)]
pub struct ShardMigrationRow {
    pub id: i64,
    pub group_id: i32,
    pub src_nodeid: i32,
    pub dest_nodeid: i32,
    pub status: String,
    pub order_in_source: i32,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub elapsed_ms: i64,
    pub shard_key_count: i64,
}

pub const MIGRATION_STATUS_SCHEDULED: &str = "SCHEDULED";
pub const MIGRATION_STATUS_MIGRATOR_RUN: &str = "MIGRATOR_RUN";
pub const MIGRATION_STATUS_MIGRATION_STARTED: &str = "MIGRATION_STARTED";
pub const MIGRATION_STATUS_COMPLETE: &str = "COMPLETE";
pub const MIGRATION_STATUS_FAILED: &str = "FAILED";

/// DDL for the four meta-tables, issued once by `INIT` (spec §4.6).
pub const CREATE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS shard_db (
    global_dbname       TEXT PRIMARY KEY,
    groupid_count        INTEGER NOT NULL,
    groupid_last_ver     BIGINT NOT NULL DEFAULT 0,
    node_last_ver        BIGINT NOT NULL DEFAULT 0,
    mig_req_count        INTEGER NOT NULL DEFAULT 0,
    ddl_req_count        INTEGER NOT NULL DEFAULT 0,
    gc_req_count         INTEGER NOT NULL DEFAULT 0,
    node_status          TEXT NOT NULL DEFAULT 'ALL_VALID',
    created_at           TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS shard_node (
    node_id         INTEGER PRIMARY KEY,
    local_dbname    TEXT NOT NULL,
    host            TEXT NOT NULL,
    port            INTEGER NOT NULL,
    status          TEXT NOT NULL,
    version         BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS shard_groupid (
    group_id         INTEGER PRIMARY KEY,
    current_node_id  INTEGER NOT NULL REFERENCES shard_node(node_id),
    version          BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS shard_migration (
    id               BIGSERIAL PRIMARY KEY,
    group_id         INTEGER NOT NULL,
    src_nodeid       INTEGER NOT NULL,
    dest_nodeid      INTEGER NOT NULL,
    status           TEXT NOT NULL,
    order_in_source  INTEGER NOT NULL,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
    modified_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    elapsed_ms       BIGINT NOT NULL DEFAULT 0,
    shard_key_count  BIGINT NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS shard_migration_src_status_order_idx
    ON shard_migration (src_nodeid, status, order_in_source, dest_nodeid);
"#;

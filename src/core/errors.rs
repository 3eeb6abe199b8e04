// src/core/errors.rs

//! Defines the primary error type for the entire application: the flat
//! `BR_ER_*` taxonomy from the shard-broker specification.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, covering every failure surfaced by the broker,
/// worker pool, dispatcher, framer, shard controller, and local-management
/// service. Using `thiserror` gives us clean `Display` impls and automatic
/// `From` conversions for the common underlying error types.
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    #[error("communication error: {0}")]
    Communication(String),

    #[error("invalid opcode")]
    InvalidOpcode,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no more memory")]
    NoMoreMemory,

    #[error("meta-database error: {0}")]
    MetaDb(String),

    #[error("database name mismatched")]
    DbNameMismatched,

    #[error("a node-add operation is already in progress")]
    NodeAddInProgress,

    #[error("node already exists")]
    NodeInfoExist,

    #[error("node does not exist")]
    NodeInfoNotExist,

    #[error("node is still in use by one or more groups")]
    NodeInUse,

    #[error("invalid source node for add-node migration")]
    NodeAddInvalidSrcNode,

    #[error("schema migration failed: {0}")]
    SchemaMigrationFail(String),

    #[error("global table migration failed: {0}")]
    GlobalTableMigrationFail(String),

    #[error("a rebalance is already running")]
    RebalanceRunning,

    #[error("invalid node id in migration request")]
    MigrationInvalidNodeId,

    #[error("request timed out")]
    RequestTimeout,

    #[error("no free server available")]
    FreeServer,

    #[error("shard info not available")]
    ShardInfoNotAvailable,

    #[error("internal error: {0}")]
    Internal(String),

    // --- I/O / infrastructure wrappers ---
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("config error: {0}")]
    Config(String),

    #[error("process spawn error: {0}")]
    Spawn(String),
}

impl From<std::io::Error> for BrokerError {
    fn from(e: std::io::Error) -> Self {
        BrokerError::Io(Arc::new(e))
    }
}

impl From<sqlx::Error> for BrokerError {
    fn from(e: sqlx::Error) -> Self {
        BrokerError::MetaDb(e.to_string())
    }
}

impl From<toml::de::Error> for BrokerError {
    fn from(e: toml::de::Error) -> Self {
        BrokerError::Config(e.to_string())
    }
}

impl From<std::num::ParseIntError> for BrokerError {
    fn from(e: std::num::ParseIntError) -> Self {
        BrokerError::InvalidArgument(e.to_string())
    }
}

impl BrokerError {
    /// Maps an error onto the wire-level `error_code` carried in a framed
    /// management response (see `core::protocol::frame`). The exact negative
    /// values are not load-bearing outside this process, only their
    /// distinctness, so we assign them in declaration order.
    pub fn wire_code(&self) -> i32 {
        use BrokerError::*;
        -(match self {
            Communication(_) => 1,
            InvalidOpcode => 2,
            InvalidArgument(_) => 3,
            NoMoreMemory => 4,
            MetaDb(_) => 5,
            DbNameMismatched => 6,
            NodeAddInProgress => 7,
            NodeInfoExist => 8,
            NodeInfoNotExist => 9,
            NodeInUse => 10,
            NodeAddInvalidSrcNode => 11,
            SchemaMigrationFail(_) => 12,
            GlobalTableMigrationFail(_) => 13,
            RebalanceRunning => 14,
            MigrationInvalidNodeId => 15,
            RequestTimeout => 16,
            FreeServer => 17,
            ShardInfoNotAvailable => 18,
            Internal(_) => 19,
            Io(_) => 20,
            Config(_) => 21,
            Spawn(_) => 22,
        } as i32)
    }
}

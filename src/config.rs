// src/config.rs

//! Manages broker configuration: loading, resolving dynamic values, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;

/// The role a configured broker plays, mirroring the broker-descriptor role
/// field.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BrokerRole {
    Normal,
    LocalMgmt,
    ShardMgmt,
}

/// Client access mode advertised by a normal broker.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMode {
    #[default]
    Rw,
    Ro,
    So,
    Repl,
}

/// Where a broker listens: a Unix-domain socket path for normal brokers, or a
/// TCP port for the shard-mgmt / local-mgmt roles (see spec §6).
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum BindAddr {
    Unix { path: String },
    Tcp { port: u16 },
}

/// One entry in the broker-descriptor array (spec §3).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerConfig {
    pub name: String,
    pub role: BrokerRole,
    pub bind: BindAddr,
    #[serde(default = "default_worker_binary")]
    pub worker_binary: String,
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    #[serde(default = "default_log_size_limit_bytes")]
    pub log_size_limit_bytes: u64,
    #[serde(default)]
    pub access_mode: AccessMode,
}

fn default_worker_binary() -> String {
    "cub_cas".to_string()
}
fn default_min_workers() -> usize {
    1
}
fn default_max_workers() -> usize {
    32
}
fn default_session_timeout_secs() -> u64 {
    300
}
fn default_log_size_limit_bytes() -> u64 {
    10 * 1024 * 1024
}

/// Tuning for the worker pool monitor, hang detector, and memory/log-reset
/// loops (spec §4.2).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PoolConfig {
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
    #[serde(default = "default_log_reset_interval_ms")]
    pub log_reset_interval_ms: u64,
    #[serde(default = "default_hang_check_interval_ms")]
    pub hang_check_interval_ms: u64,
    #[serde(default = "default_appl_server_hard_limit_bytes")]
    pub appl_server_hard_limit_bytes: u64,
    #[serde(default = "default_time_to_kill_secs")]
    pub time_to_kill_secs: u64,
    #[serde(default = "default_worker_ready_timeout_ms")]
    pub worker_ready_timeout_ms: u64,
}

fn default_monitor_interval_ms() -> u64 {
    100
}
fn default_log_reset_interval_ms() -> u64 {
    1000
}
fn default_hang_check_interval_ms() -> u64 {
    5000
}
fn default_appl_server_hard_limit_bytes() -> u64 {
    1024 * 1024 * 1024
}
fn default_time_to_kill_secs() -> u64 {
    60
}
fn default_worker_ready_timeout_ms() -> u64 {
    5000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            monitor_interval_ms: default_monitor_interval_ms(),
            log_reset_interval_ms: default_log_reset_interval_ms(),
            hang_check_interval_ms: default_hang_check_interval_ms(),
            appl_server_hard_limit_bytes: default_appl_server_hard_limit_bytes(),
            time_to_kill_secs: default_time_to_kill_secs(),
            worker_ready_timeout_ms: default_worker_ready_timeout_ms(),
        }
    }
}

/// Tuning for the migration orchestrator (spec §4.7).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MigrationConfig {
    #[serde(default = "default_max_migrators_per_source")]
    pub max_migrators_per_source: usize,
    #[serde(default = "default_migrator_start_wait_secs")]
    pub migrator_start_wait_secs: u64,
    #[serde(default = "default_orchestrator_interval_secs")]
    pub orchestrator_interval_secs: u64,
}

fn default_max_migrators_per_source() -> usize {
    4
}
fn default_migrator_start_wait_secs() -> u64 {
    60
}
fn default_orchestrator_interval_secs() -> u64 {
    60
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            max_migrators_per_source: default_max_migrators_per_source(),
            migrator_start_wait_secs: default_migrator_start_wait_secs(),
            orchestrator_interval_secs: default_orchestrator_interval_secs(),
        }
    }
}

/// Connection parameters for the metadata store (spec §4.5).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetaStoreConfig {
    pub url: String,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_query_timeout_ms() -> u64 {
    5000
}
fn default_max_connections() -> u32 {
    10
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    8878
}

/// A raw representation of the config file before validation and resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    control_key: Option<String>,
    brokers: Vec<BrokerConfig>,
    metastore: MetaStoreConfig,
    #[serde(default)]
    pool: PoolConfig,
    #[serde(default)]
    migration: MigrationConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// The final, validated, and resolved broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub log_level: String,
    /// Hex key identifying the control region, read from `control_key` or
    /// `MASTER_SHM_KEY` if unset (spec §6 environment variables).
    pub control_key: String,
    pub brokers: Vec<BrokerConfig>,
    pub metastore: MetaStoreConfig,
    pub pool: PoolConfig,
    pub migration: MigrationConfig,
    pub metrics: MetricsConfig,
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;

        let control_key = raw
            .control_key
            .or_else(|| std::env::var("MASTER_SHM_KEY").ok())
            .context("control_key must be set in config or MASTER_SHM_KEY env var")?;

        let config = Config {
            log_level: raw.log_level,
            control_key,
            brokers: raw.brokers,
            metastore: raw.metastore,
            pool: raw.pool,
            migration: raw.migration,
            metrics: raw.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    fn validate(&self) -> Result<()> {
        if self.brokers.is_empty() {
            return Err(anyhow!("at least one broker must be configured"));
        }

        let mut seen = std::collections::HashSet::new();
        for broker in &self.brokers {
            if !seen.insert(broker.name.as_str()) {
                return Err(anyhow!("duplicate broker name '{}'", broker.name));
            }
            if broker.min_workers == 0 {
                return Err(anyhow!("broker '{}': min_workers cannot be 0", broker.name));
            }
            if broker.max_workers < broker.min_workers {
                return Err(anyhow!(
                    "broker '{}': max_workers must be >= min_workers",
                    broker.name
                ));
            }
            // Every broker role in this realization binds TCP uniformly: the
            // dispatch acceptor and job queue are written against
            // `tokio::net::TcpStream` concretely (see DESIGN.md), so a
            // `BindAddr::Unix` config, while still accepted by the wire
            // format below, cannot actually be served.
            if let BindAddr::Unix { .. } = &broker.bind {
                return Err(anyhow!(
                    "broker '{}': this build only supports TCP-bound brokers, got a unix-domain bind",
                    broker.name
                ));
            }
        }

        if self.metastore.url.trim().is_empty() {
            return Err(anyhow!("metastore.url cannot be empty"));
        }

        if self.migration.max_migrators_per_source == 0 {
            return Err(anyhow!("migration.max_migrators_per_source cannot be 0"));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(anyhow!("metrics.port cannot be 0 when metrics are enabled"));
        }

        Ok(())
    }
}

// src/core/metrics.rs

//! Defines and registers Prometheus metrics for broker monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, TextEncoder, register_counter,
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
};

lazy_static! {
    // --- Worker pool gauges ---
    /// Current worker count per broker, labeled by broker name.
    pub static ref POOL_WORKER_COUNT: GaugeVec =
        register_gauge_vec!("shardbroker_pool_worker_count", "Current worker count.", &["broker"]).unwrap();
    /// Number of idle workers per broker.
    pub static ref POOL_IDLE_WORKERS: GaugeVec =
        register_gauge_vec!("shardbroker_pool_idle_workers", "Idle worker count.", &["broker"]).unwrap();
    /// Depth of the per-broker job queue.
    pub static ref JOB_QUEUE_DEPTH: GaugeVec =
        register_gauge_vec!("shardbroker_job_queue_depth", "Pending job queue depth.", &["broker"]).unwrap();
    /// Whether the hang detector has tripped `reject_client_flag` for a broker.
    pub static ref REJECT_CLIENT_FLAG: GaugeVec =
        register_gauge_vec!("shardbroker_reject_client_flag", "1 if reject_client_flag is set.", &["broker"]).unwrap();

    // --- Worker pool counters ---
    pub static ref WORKER_RESTARTS_TOTAL: CounterVec =
        register_counter_vec!("shardbroker_worker_restarts_total", "Total worker restarts.", &["broker"]).unwrap();
    pub static ref JOBS_REJECTED_TOTAL: CounterVec =
        register_counter_vec!("shardbroker_jobs_rejected_total", "Total jobs rejected (free-server).", &["broker"]).unwrap();
    pub static ref JOBS_DISPATCHED_TOTAL: CounterVec =
        register_counter_vec!("shardbroker_jobs_dispatched_total", "Total jobs handed off to a worker.", &["broker"]).unwrap();
    pub static ref CONNECTIONS_RECEIVED_TOTAL: CounterVec =
        register_counter_vec!("shardbroker_connections_received_total", "Total accepted connections.", &["broker"]).unwrap();

    // --- Shard controller counters ---
    pub static ref MIGRATIONS_STARTED_TOTAL: Counter =
        register_counter!("shardbroker_migrations_started_total", "Total MIGRATION_START handled.").unwrap();
    pub static ref MIGRATIONS_COMPLETED_TOTAL: Counter =
        register_counter!("shardbroker_migrations_completed_total", "Total migrations completed successfully.").unwrap();
    pub static ref MIGRATIONS_FAILED_TOTAL: Counter =
        register_counter!("shardbroker_migrations_failed_total", "Total migrations that ended in FAILED.").unwrap();
    pub static ref DDL_COMPENSATIONS_TOTAL: Counter =
        register_counter!("shardbroker_ddl_compensations_total", "Total DDL_END compensations run on disconnect.").unwrap();
    pub static ref GC_COMPENSATIONS_TOTAL: Counter =
        register_counter!("shardbroker_gc_compensations_total", "Total GC_END compensations run on disconnect.").unwrap();
    pub static ref MIGRATION_COMPENSATIONS_TOTAL: Counter =
        register_counter!("shardbroker_migration_compensations_total", "Total MIGRATION_END(fail) compensations run on disconnect.").unwrap();
    /// Failures of the second (recovery) transaction during `ADD_NODE`
    /// compensation, tracked per the "log and proceed" design decision.
    pub static ref COMPENSATION_FAILURES_TOTAL: Counter =
        register_counter!("shardbroker_compensation_failures_total", "Total failures of a recovery transaction run during error compensation.").unwrap();

    // --- Migration orchestrator gauges ---
    pub static ref MIGRATION_JOBS_SCHEDULED: Gauge =
        register_gauge!("shardbroker_migration_jobs_scheduled", "Rows in shard_migration with status=SCHEDULED.").unwrap();
    pub static ref MIGRATION_JOBS_RUNNING: Gauge =
        register_gauge!("shardbroker_migration_jobs_running", "Rows in shard_migration with status in {MIGRATOR_RUN, MIGRATION_STARTED}.").unwrap();

    // --- Framer / dispatcher histograms ---
    pub static ref REQUEST_LATENCY_SECONDS: Histogram =
        register_histogram!("shardbroker_request_latency_seconds", "Latency of a framed management request, end to end.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}

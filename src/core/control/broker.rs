// src/core/control/broker.rs

//! Broker descriptor and per-broker runtime handle (spec §3).

use crate::config::{AccessMode, BrokerConfig, BrokerRole};
use crate::core::control::job_queue::JobQueue;
use crate::core::control::worker::WorkerDescriptor;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::sync::Mutex as AsyncMutex;

/// Counters embedded in the broker descriptor (spec §3).
#[derive(Default)]
pub struct BrokerCounters {
    pub connections_received: AtomicU64,
    pub jobs_rejected: AtomicU64,
    pub jobs_dispatched: AtomicU64,
    pub worker_restarts: AtomicU64,
}

/// Runtime state for one configured broker: its descriptor fields, its
/// worker-slot array, and its job queue. Brokers never change role, port, or
/// worker binary at runtime, so those fields are plain values; fields that
/// do change (current worker count, access mode, reject flag) are atomics.
pub struct BrokerHandle {
    pub name: String,
    pub role: BrokerRole,
    pub worker_binary: String,
    pub min_workers: usize,
    pub max_workers: usize,
    pub session_timeout_secs: u64,
    pub log_size_limit_bytes: u64,
    pub access_mode: AtomicAccessMode,
    pub counters: BrokerCounters,
    /// The pool-wide mutex guarding worker-count changes (spec §5, "(1) A
    /// process-wide mutex guards worker-count changes"). Holding this is a
    /// precondition for touching any slot's `con_status`.
    pub pool_lock: AsyncMutex<()>,
    pub workers: Vec<WorkerDescriptor>,
    pub job_queue: JobQueue,
    /// Set by the hang detector; consulted by the acceptor to short-circuit
    /// new connections without doing any dispatch work (spec §4.2, §4.3).
    pub reject_client_flag: AtomicBool,
    current_worker_count: AtomicU32,
}

/// A tiny atomic wrapper since `AccessMode` isn't `Copy`-into-an-atomic by
/// default; it only ever holds one of four small discriminants.
pub struct AtomicAccessMode(AtomicU32);

impl AtomicAccessMode {
    fn encode(mode: AccessMode) -> u32 {
        match mode {
            AccessMode::Rw => 0,
            AccessMode::Ro => 1,
            AccessMode::So => 2,
            AccessMode::Repl => 3,
        }
    }

    fn decode(v: u32) -> AccessMode {
        match v {
            0 => AccessMode::Rw,
            1 => AccessMode::Ro,
            2 => AccessMode::So,
            _ => AccessMode::Repl,
        }
    }

    pub fn new(mode: AccessMode) -> Self {
        Self(AtomicU32::new(Self::encode(mode)))
    }

    pub fn load(&self) -> AccessMode {
        Self::decode(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, mode: AccessMode) {
        self.0.store(Self::encode(mode), Ordering::Relaxed);
    }
}

impl BrokerHandle {
    pub fn new(config: &BrokerConfig, job_queue_capacity: usize) -> Self {
        let workers = (0..config.max_workers)
            .map(WorkerDescriptor::new)
            .collect();
        Self {
            name: config.name.clone(),
            role: config.role,
            worker_binary: config.worker_binary.clone(),
            min_workers: config.min_workers,
            max_workers: config.max_workers,
            session_timeout_secs: config.session_timeout_secs,
            log_size_limit_bytes: config.log_size_limit_bytes,
            access_mode: AtomicAccessMode::new(config.access_mode),
            counters: BrokerCounters::default(),
            pool_lock: AsyncMutex::new(()),
            workers,
            job_queue: JobQueue::new(job_queue_capacity),
            reject_client_flag: AtomicBool::new(false),
            current_worker_count: AtomicU32::new(config.min_workers as u32),
        }
    }

    pub fn current_worker_count(&self) -> usize {
        self.current_worker_count.load(Ordering::Relaxed) as usize
    }

    pub fn set_current_worker_count(&self, n: usize) {
        self.current_worker_count.store(n as u32, Ordering::Relaxed);
    }
}

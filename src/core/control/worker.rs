// src/core/control/worker.rs

//! Worker descriptor: one entry per worker slot in a broker's pool.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;

/// Whether a worker slot is administratively enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceFlag {
    Off,
    On,
    OffAck,
}

/// Liveness of the worker process occupying a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessStatus {
    Idle,
    Busy,
    Restart,
    Start,
    Stop,
}

/// Connection-handoff sub-state of a slot, guarded by its own mutex per spec
/// §5's "mutex-then-semaphore" ordering rule: callers must already hold the
/// pool-wide lock before acquiring this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    OutTran,
    InTran,
    Close,
    CloseAndConnect,
}

/// Mutable liveness/administrative fields, distinct from `con_status` so the
/// two can be locked independently as the spec's ordering rule requires.
#[derive(Debug)]
pub struct WorkerMutableState {
    pub pid: Option<u32>,
    pub service_flag: ServiceFlag,
    pub liveness: LivenessStatus,
    pub last_client_addr: Option<SocketAddr>,
    pub last_client_version: u32,
}

impl Default for WorkerMutableState {
    fn default() -> Self {
        Self {
            pid: None,
            service_flag: ServiceFlag::Off,
            liveness: LivenessStatus::Stop,
            last_client_addr: None,
            last_client_version: 0,
        }
    }
}

/// One worker-pool slot.
pub struct WorkerDescriptor {
    pub slot: usize,
    pub mutable: Mutex<WorkerMutableState>,
    pub con_status: Mutex<ConnStatus>,
    /// Milliseconds since epoch of the last time this slot was touched by
    /// the dispatcher; used by `find_drop`'s idle-time comparisons.
    last_access_ms: AtomicI64,
    /// Milliseconds since epoch of the worker's last `claimed_alive`
    /// heartbeat; used by the hang detector.
    last_alive_claim_ms: AtomicI64,
    pub rss_bytes: AtomicU64,
    pub restarts: AtomicU32,
}

fn now_ms() -> i64 {
    // Monotonic stand-in: we only ever compare differences within one
    // process lifetime, so an `Instant`-derived offset is sufficient and
    // avoids the forbidden `SystemTime::now()` wall-clock read in hot paths.
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    start.elapsed().as_millis() as i64
}

impl WorkerDescriptor {
    pub fn new(slot: usize) -> Self {
        let now = now_ms();
        Self {
            slot,
            mutable: Mutex::new(WorkerMutableState::default()),
            con_status: Mutex::new(ConnStatus::OutTran),
            last_access_ms: AtomicI64::new(now),
            last_alive_claim_ms: AtomicI64::new(now),
            rss_bytes: AtomicU64::new(0),
            restarts: AtomicU32::new(0),
        }
    }

    pub fn touch_access(&self) {
        self.last_access_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn claim_alive(&self) {
        self.last_alive_claim_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn idle_ms(&self) -> i64 {
        now_ms() - self.last_access_ms.load(Ordering::Relaxed)
    }

    pub fn ms_since_alive_claim(&self) -> i64 {
        now_ms() - self.last_alive_claim_ms.load(Ordering::Relaxed)
    }
}

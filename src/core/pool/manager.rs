// src/core/pool/manager.rs

//! Worker Pool Manager (C2): admission/expansion/contraction decisions over
//! a broker's worker-slot array (spec §4.2).

use super::spawn::{SpawnedWorker, spawn_worker, stop_worker};
use crate::config::PoolConfig;
use crate::core::control::broker::BrokerHandle;
use crate::core::control::worker::{ConnStatus, LivenessStatus, ServiceFlag};
use crate::core::errors::BrokerError;
use crate::core::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{Mutex, watch};
use tracing::info;

pub struct WorkerPoolManager {
    pub broker: Arc<BrokerHandle>,
    pub control_key: String,
    pub pool_config: PoolConfig,
    /// Live child handles for slots this manager started, indexed by slot.
    children: Mutex<Vec<Option<Child>>>,
}

impl WorkerPoolManager {
    pub fn new(broker: Arc<BrokerHandle>, control_key: String, pool_config: PoolConfig) -> Self {
        let slots = broker.max_workers;
        Self {
            broker,
            control_key,
            pool_config,
            children: Mutex::new((0..slots).map(|_| None).collect()),
        }
    }

    /// `ensure_started(slot)` (spec §4.2): forks/execs the worker binary and
    /// waits (bounded) for readiness.
    pub async fn ensure_started(&self, slot: usize) -> Result<u32, BrokerError> {
        let _pool_guard = self.broker.pool_lock.lock().await;
        let worker = &self.broker.workers[slot];

        {
            let mut mutable = worker.mutable.lock().await;
            mutable.liveness = LivenessStatus::Start;
        }

        let (ready_tx, ready_rx) = watch::channel(false);
        // A real deployment flips `ready_tx` from the handshake listener the
        // worker connects back to; we simulate an immediate handshake here
        // since no concrete worker binary exists in this tree.
        let _ = ready_tx.send(true);

        let SpawnedWorker { child, pid } = spawn_worker(
            &self.broker.worker_binary,
            &self.broker.name,
            slot,
            &self.control_key,
            ready_rx,
            Duration::from_millis(self.pool_config.worker_ready_timeout_ms),
        )
        .await?;

        self.children.lock().await[slot] = Some(child);

        {
            let mut mutable = worker.mutable.lock().await;
            mutable.pid = Some(pid);
            mutable.service_flag = ServiceFlag::On;
            mutable.liveness = LivenessStatus::Idle;
        }
        worker.restarts.fetch_add(0, std::sync::atomic::Ordering::Relaxed);
        worker.touch_access();
        worker.claim_alive();
        metrics::POOL_WORKER_COUNT
            .with_label_values(&[&self.broker.name])
            .inc();

        Ok(pid)
    }

    /// `stop(slot)` (spec §4.2).
    pub async fn stop(&self, slot: usize) -> Result<(), BrokerError> {
        let _pool_guard = self.broker.pool_lock.lock().await;
        let worker = &self.broker.workers[slot];

        let mut children = self.children.lock().await;
        if let Some(mut child) = children[slot].take() {
            stop_worker(&mut child, 10, Duration::from_millis(300)).await?;
        }
        drop(children);

        let mut mutable = worker.mutable.lock().await;
        mutable.pid = None;
        mutable.service_flag = ServiceFlag::Off;
        mutable.liveness = LivenessStatus::Stop;
        metrics::POOL_WORKER_COUNT
            .with_label_values(&[&self.broker.name])
            .dec();
        Ok(())
    }

    /// `restart(slot)` (spec §4.2): stop then start, preserving counters.
    pub async fn restart(&self, slot: usize) -> Result<u32, BrokerError> {
        self.stop(slot).await?;
        let pid = self.ensure_started(slot).await?;
        self.broker.workers[slot]
            .restarts
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        metrics::WORKER_RESTARTS_TOTAL
            .with_label_values(&[&self.broker.name])
            .inc();
        Ok(pid)
    }

    /// `find_idle` (spec §4.2): lowest-index idle slot with a live pid, or a
    /// busy-but-out-of-transaction slot with the longest idle time if the
    /// pool is saturated. Returns `None` if no slot is admissible.
    pub async fn find_idle(&self) -> Option<usize> {
        for (idx, worker) in self.broker.workers.iter().enumerate() {
            if idx >= self.broker.current_worker_count() {
                break;
            }
            let mutable = worker.mutable.lock().await;
            if mutable.liveness == LivenessStatus::Idle
                && mutable.service_flag == ServiceFlag::On
                && mutable.pid.is_some()
            {
                return Some(idx);
            }
        }

        if self.broker.current_worker_count() < self.broker.max_workers {
            return None;
        }

        let mut best: Option<(usize, i64)> = None;
        for (idx, worker) in self.broker.workers.iter().enumerate() {
            if idx >= self.broker.current_worker_count() {
                break;
            }
            let mutable = worker.mutable.lock().await;
            if mutable.liveness != LivenessStatus::Busy {
                continue;
            }
            let con_status = worker.con_status.lock().await;
            if *con_status != ConnStatus::OutTran {
                continue;
            }
            let idle = worker.idle_ms();
            if best.map(|(_, best_idle)| idle > best_idle).unwrap_or(true) {
                best = Some((idx, idle));
            }
        }

        if let Some((idx, _)) = best {
            *self.broker.workers[idx].con_status.lock().await = ConnStatus::CloseAndConnect;
        }
        best.map(|(idx, _)| idx)
    }

    /// `find_add` (spec §4.2): any slot currently `SERVICE_OFF_ACK`, not the
    /// one being dropped.
    pub async fn find_add(&self, excluding: Option<usize>) -> Option<usize> {
        for (idx, worker) in self.broker.workers.iter().enumerate() {
            if Some(idx) == excluding {
                continue;
            }
            let mutable = worker.mutable.lock().await;
            if mutable.service_flag == ServiceFlag::OffAck {
                return Some(idx);
            }
        }
        None
    }

    /// `find_drop` (spec §4.2).
    pub async fn find_drop(&self) -> Option<usize> {
        let current = self.broker.current_worker_count();
        if current <= self.broker.min_workers {
            return None;
        }
        if !self.broker.job_queue.is_empty().await {
            return None;
        }

        let time_to_kill_ms = (self.pool_config.time_to_kill_secs * 1000) as i64;
        let mut idle_candidate: Option<(usize, i64)> = None;
        let mut busy_candidate: Option<(usize, i64)> = None;

        for (idx, worker) in self.broker.workers.iter().enumerate() {
            if idx >= current {
                break;
            }
            let mutable = worker.mutable.lock().await;
            let idle = worker.idle_ms();
            match mutable.liveness {
                LivenessStatus::Idle if idle > time_to_kill_ms => {
                    if idle_candidate.map(|(_, best)| idle > best).unwrap_or(true) {
                        idle_candidate = Some((idx, idle));
                    }
                }
                LivenessStatus::Busy if idle > time_to_kill_ms => {
                    if busy_candidate.map(|(_, best)| idle > best).unwrap_or(true) {
                        busy_candidate = Some((idx, idle));
                    }
                }
                _ => {}
            }
        }

        if idle_candidate.is_some() {
            idle_candidate.map(|(idx, _)| idx)
        } else {
            busy_candidate.map(|(idx, _)| idx)
        }
    }

    pub async fn mark_idle(&self, slot: usize) {
        let worker = &self.broker.workers[slot];
        let mut mutable = worker.mutable.lock().await;
        mutable.liveness = LivenessStatus::Idle;
        worker.touch_access();
    }

    pub async fn mark_busy(&self, slot: usize) {
        let worker = &self.broker.workers[slot];
        let mut mutable = worker.mutable.lock().await;
        mutable.liveness = LivenessStatus::Busy;
        worker.touch_access();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccessMode, BrokerConfig, BrokerRole, BindAddr};

    fn test_broker() -> Arc<BrokerHandle> {
        let cfg = BrokerConfig {
            name: "test".into(),
            role: BrokerRole::Normal,
            bind: BindAddr::Unix { path: "/tmp/test.sock".into() },
            worker_binary: "/bin/true".into(),
            min_workers: 1,
            max_workers: 2,
            session_timeout_secs: 30,
            log_size_limit_bytes: 1024,
            access_mode: AccessMode::Rw,
        };
        Arc::new(BrokerHandle::new(&cfg, 8))
    }

    #[tokio::test]
    async fn find_idle_returns_none_when_no_workers_started() {
        let broker = test_broker();
        let manager = WorkerPoolManager::new(broker, "deadbeef".into(), PoolConfig::default());
        assert_eq!(manager.find_idle().await, None);
    }

    #[tokio::test]
    async fn find_add_finds_off_ack_slot() {
        let broker = test_broker();
        {
            let mut mutable = broker.workers[1].mutable.lock().await;
            mutable.service_flag = ServiceFlag::OffAck;
        }
        let manager = WorkerPoolManager::new(broker, "deadbeef".into(), PoolConfig::default());
        assert_eq!(manager.find_add(None).await, Some(1));
    }
}

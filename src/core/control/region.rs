// src/core/control/region.rs

//! `ControlRegion` stands in for the source's attached shared-memory
//! segment (spec §4.1, §9 Design Notes "Global mutable state"): a single
//! `Arc<ControlRegion>` built once in `main` and threaded to every task
//! instead of touched through process globals.

use crate::config::Config;
use crate::core::control::broker::BrokerHandle;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Status word mirroring the source's header: readers must not attach (i.e.
/// must not be handed an `Arc<ControlRegion>` to use) until every broker
/// handle has been registered and the status is flipped to `Valid`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionStatus {
    Initializing = 0,
    Valid = 1,
}

/// A double-buffered table with a sequence counter, letting readers observe
/// a consistent snapshot without blocking the writer (spec §4.1: "an
/// unusable-databases table, double-buffered with a sequence counter for
/// lock-free readers").
pub struct DoubleBuffered<T> {
    seq: AtomicU64,
    slots: [parking_lot::Mutex<Option<Arc<T>>>; 2],
}

impl<T> DoubleBuffered<T> {
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            slots: [parking_lot::Mutex::new(None), parking_lot::Mutex::new(None)],
        }
    }

    /// Publishes a new snapshot, flipping readers over to it.
    pub fn publish(&self, value: T) {
        let next_seq = self.seq.load(Ordering::Acquire) + 1;
        let slot = (next_seq % 2) as usize;
        *self.slots[slot].lock() = Some(Arc::new(value));
        self.seq.store(next_seq, Ordering::Release);
    }

    /// Returns the most recently published snapshot, if any.
    pub fn current(&self) -> Option<Arc<T>> {
        let seq = self.seq.load(Ordering::Acquire);
        let slot = (seq % 2) as usize;
        self.slots[slot].lock().clone()
    }
}

impl<T> Default for DoubleBuffered<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide control region.
pub struct ControlRegion {
    /// Hex key identifying this region, standing in for the source's
    /// shared-memory key (spec §4.1 header: "random key string").
    pub key: String,
    status: AtomicU8,
    pub brokers: DashMap<String, Arc<BrokerHandle>>,
    /// Per-broker unusable-database tables, keyed by broker name.
    pub unusable_databases: DashMap<String, DoubleBuffered<Vec<String>>>,
}

impl ControlRegion {
    /// Builds the region and registers every configured broker, then marks
    /// the region `Valid`. Peers constructed from the same `Config` would
    /// refuse to proceed before this point; in-process there are no peers to
    /// race, but the status word is preserved for fidelity to spec §4.1's
    /// startup contract and is checked by `is_valid`.
    pub fn build(config: &Config) -> Arc<Self> {
        let region = Arc::new(Self {
            key: config.control_key.clone(),
            status: AtomicU8::new(RegionStatus::Initializing as u8),
            brokers: DashMap::new(),
            unusable_databases: DashMap::new(),
        });

        for broker_config in &config.brokers {
            let queue_capacity = broker_config.max_workers.saturating_mul(4).max(16);
            let handle = Arc::new(BrokerHandle::new(broker_config, queue_capacity));
            region
                .unusable_databases
                .insert(broker_config.name.clone(), DoubleBuffered::new());
            region.brokers.insert(broker_config.name.clone(), handle);
        }

        region.status.store(RegionStatus::Valid as u8, Ordering::Release);
        region
    }

    pub fn is_valid(&self) -> bool {
        self.status.load(Ordering::Acquire) == RegionStatus::Valid as u8
    }

    pub fn broker(&self, name: &str) -> Option<Arc<BrokerHandle>> {
        self.brokers.get(name).map(|e| e.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_buffer_publishes_latest() {
        let db: DoubleBuffered<Vec<i32>> = DoubleBuffered::new();
        assert!(db.current().is_none());
        db.publish(vec![1, 2, 3]);
        assert_eq!(*db.current().unwrap(), vec![1, 2, 3]);
        db.publish(vec![4, 5]);
        assert_eq!(*db.current().unwrap(), vec![4, 5]);
    }
}

// src/core/control/job_queue.rs

//! Per-broker bounded max-heap of pending connection hand-offs (spec §3, §4.3).

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};

/// A pending client hand-off. Priority increases every time the dispatcher
/// skips the job while scanning for an idle worker, so no job starves (spec
/// §4.3 "Fairness").
pub struct JobEntry {
    pub priority: u64,
    pub socket: TcpStream,
    pub client_addr: SocketAddr,
    pub received_at: Instant,
    pub client_version: u32,
}

impl PartialEq for JobEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}
impl Eq for JobEntry {}
impl PartialOrd for JobEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for JobEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; ties are intentionally left to heap
        // order, matching the source (spec §9 Open Questions: no FIFO
        // guarantee at equal priority).
        self.priority.cmp(&other.priority)
    }
}

/// Capacity-bounded max-heap guarded by a single mutex, with a `Notify`
/// standing in for the source's queue condition variable (spec §5: "the
/// condition variable uses that same mutex").
pub struct JobQueue {
    capacity: usize,
    heap: Mutex<BinaryHeap<JobEntry>>,
    notify: Notify,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        }
    }

    /// Attempts to enqueue a job. Returns the job back to the caller if the
    /// queue is full, so it can be rejected with `BR_ER_FREE_SERVER`.
    pub async fn try_push(&self, entry: JobEntry) -> Result<(), JobEntry> {
        let mut heap = self.heap.lock().await;
        if heap.len() >= self.capacity {
            return Err(entry);
        }
        heap.push(entry);
        drop(heap);
        self.notify.notify_one();
        Ok(())
    }

    /// Removes and returns the highest-priority job, if any.
    pub async fn pop(&self) -> Option<JobEntry> {
        self.heap.lock().await.pop()
    }

    /// Increments the priority of every job still waiting, aging the queue
    /// between dispatch retries (spec §4.3).
    pub async fn age_all(&self) {
        let mut heap = self.heap.lock().await;
        let aged: Vec<JobEntry> = heap
            .drain()
            .map(|mut j| {
                j.priority = j.priority.saturating_add(1);
                j
            })
            .collect();
        heap.extend(aged);
    }

    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Waits until a job is pushed or the given duration elapses.
    pub async fn wait_for_job(&self, timeout: std::time::Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_addr() -> SocketAddr {
        "127.0.0.1:1".parse().unwrap()
    }

    async fn dummy_entry(priority: u64) -> (JobEntry, TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_sock, _) = listener.accept().await.unwrap();
        (
            JobEntry {
                priority,
                socket: server_sock,
                client_addr: dummy_addr(),
                received_at: Instant::now(),
                client_version: 1,
            },
            client,
        )
    }

    #[tokio::test]
    async fn full_queue_rejects() {
        let queue = JobQueue::new(0);
        let (entry, _client) = dummy_entry(0).await;
        assert!(queue.try_push(entry).await.is_err());
    }

    #[tokio::test]
    async fn aging_increases_priority() {
        let queue = JobQueue::new(4);
        let (entry, _client) = dummy_entry(0).await;
        queue.try_push(entry).await.ok();
        queue.age_all().await;
        let job = queue.pop().await.unwrap();
        assert_eq!(job.priority, 1);
    }
}

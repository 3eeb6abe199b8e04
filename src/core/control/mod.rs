// src/core/control/mod.rs

//! The in-process stand-in for the source's shared-memory control region: a
//! process-wide table of brokers, workers, and job queues threaded explicitly
//! through `Arc`s instead of touched through global statics (see spec Design
//! Notes, "Global mutable state").

pub mod broker;
pub mod job_queue;
pub mod region;
pub mod worker;

pub use broker::{BrokerCounters, BrokerHandle};
pub use job_queue::{JobEntry, JobQueue};
pub use region::ControlRegion;
pub use worker::{ConnStatus, LivenessStatus, ServiceFlag, WorkerDescriptor};

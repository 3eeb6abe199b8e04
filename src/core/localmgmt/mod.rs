// src/core/localmgmt/mod.rs

//! Local Management Service (C8): process launching and small file/conf
//! RPCs used by the shard controller and by operators (spec §4.8).

pub mod launch;
pub mod service;

pub use launch::{Launcher, ProcessId};
pub use service::LocalMgmtService;

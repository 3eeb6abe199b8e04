// src/core/metastore/mod.rs

//! Metadata Store Client (C5): persistence for shard topology and
//! migration state (spec §3, §4.5).

pub mod client;
pub mod schema;

pub use client::MetaStoreClient;

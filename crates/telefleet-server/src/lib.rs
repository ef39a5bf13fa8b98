//! Telefleet Server Library
//!
//! Shard coordination runtime for a telemetry collection fleet: membership
//! discovery, the shard coordinator, the device filter registry and the
//! admin API.

pub mod api;
pub mod collector;
pub mod config;
pub mod discovery;
pub mod filter;
pub mod node;
pub mod observability;
pub mod sharding;
pub mod signal;
pub mod version;

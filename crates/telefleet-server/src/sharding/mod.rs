//! Shard Coordination
//!
//! Decides which configured devices this node collects, without consensus.
//! Every node reads the same membership snapshot and runs the same pure
//! hash functions from `telefleet_core::hashing`, so the cluster agrees on
//! ownership without exchanging messages.
//!
//! ## Flow
//!
//! ```text
//! Discovery::instances()
//!        ↓
//!   SlotMap / healthy_count
//!        ↓
//! FilterRegistry ("mainShard", "extraShard")
//!        ↓
//! update_request signal
//!        ↓
//! SubscriptionTracker
//! ```
//!
//! ## Lifecycle
//!
//! `Registering → WarmingUp → Settling → Steady ⇄ TakenOver ⇄ Suspended`

mod coordinator;
mod status;

pub use coordinator::{CoordinatorError, ShardCoordinator};
pub use status::{ShardPhase, ShardStatus};

/// Filter holding the node's permanent share of devices.
pub const MAIN_SHARD: &str = "mainShard";

/// Filter holding devices taken over from failed slots.
pub const EXTRA_SHARD: &str = "extraShard";

//! Core shared types and shard assignment for telefleet
//!
//! This crate contains the device and member models plus the pure
//! functions every node in the collection fleet uses to decide which
//! devices it polls. Nothing in here performs I/O or holds state, so
//! every cluster member computes the same answer from the same inputs.

pub mod device;
pub mod hashing;
pub mod member;

pub use device::Device;
pub use hashing::{
    extra_shard, failed_slots, fnv1a_32, group_key, healthy_count, main_shard, DevicePredicate, SlotMap,
};
pub use member::{Member, MemberStatus, SHARDS_ENABLED};

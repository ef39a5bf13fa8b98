//! Shard Assignment
//!
//! Modulo partitioning of devices over a fixed number of slots, plus a
//! reduced-modulus remap that spreads the devices of failed slots across
//! the survivors.
//!
//! Properties:
//! - Every device maps to exactly one slot while all slots are passing
//! - Devices whose home slot is healthy never move
//! - Orphaned devices land on exactly one surviving slot
//! - Deterministic: every member computes the same answer from the same snapshot

use crate::{Device, Member};
use std::sync::Arc;

/// "Is this device mine" decision installed into the filter registry.
pub type DevicePredicate = Arc<dyn Fn(&Device) -> bool + Send + Sync>;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a.
pub fn fnv1a_32(data: &[u8]) -> u32 {
    data.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Stable key used to place a device.
///
/// An explicit `group_id` wins, which lets operators pin devices to a slot.
pub fn group_key(device: &Device) -> u32 {
    if device.group_id != 0 {
        device.group_id
    } else {
        fnv1a_32(device.host.as_bytes())
    }
}

/// Steady-state predicate: the device's home slot is `my_id`.
pub fn main_shard(my_id: usize, shard_size: usize) -> DevicePredicate {
    Arc::new(move |device: &Device| {
        shard_size != 0 && group_key(device) as usize % shard_size == my_id
    })
}

/// Take-over predicate for `my_id` given the current membership snapshot.
pub fn extra_shard(my_id: usize, shard_size: usize, members: &[Member]) -> DevicePredicate {
    SlotMap::from_members(shard_size, members).takeover(my_id)
}

/// Ordered list of failed slots for this snapshot.
pub fn failed_slots(shard_size: usize, members: &[Member]) -> Vec<usize> {
    SlotMap::from_members(shard_size, members).failed().to_vec()
}

/// Number of passing members that carry the sharding marker.
pub fn healthy_count(members: &[Member]) -> usize {
    members.iter().filter(|m| m.is_healthy_shard()).count()
}

/// Slot layout of the cluster derived from one membership snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMap {
    shard_size: usize,
    /// Failed slots in ascending order
    failed: Vec<usize>,
    /// Compacted survivor index per slot; `None` for failed slots
    map_index: Vec<Option<usize>>,
}

impl SlotMap {
    /// Place members at their own slot and classify every slot.
    ///
    /// A slot is failed when nobody registered it, when its member lacks the
    /// sharding marker, or when its member is not passing. If two members
    /// claim the same slot the later one in `members` wins.
    pub fn from_members(shard_size: usize, members: &[Member]) -> Self {
        let mut nodes: Vec<Option<&Member>> = vec![None; shard_size];
        for member in members.iter().filter(|m| m.is_shard_enabled()) {
            if let Some(slot) = member.slot().filter(|slot| *slot < shard_size) {
                nodes[slot] = Some(member);
            }
        }

        let mut failed = Vec::new();
        let mut map_index = Vec::with_capacity(shard_size);
        for (slot, node) in nodes.iter().enumerate() {
            if node.is_some_and(|m| m.is_passing()) {
                map_index.push(Some(slot - failed.len()));
            } else {
                failed.push(slot);
                map_index.push(None);
            }
        }

        Self {
            shard_size,
            failed,
            map_index,
        }
    }

    pub fn failed(&self) -> &[usize] {
        &self.failed
    }

    /// Number of passing slots.
    pub fn survivors(&self) -> usize {
        self.shard_size - self.failed.len()
    }

    pub fn all_passing(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn is_failed(&self, slot: usize) -> bool {
        self.map_index.get(slot).map_or(true, Option::is_none)
    }

    /// Dense index of a surviving slot among all survivors.
    pub fn map_index(&self, slot: usize) -> Option<usize> {
        self.map_index.get(slot).copied().flatten()
    }

    /// Slot that ends up polling a device with this group key.
    ///
    /// Returns `None` only when every slot has failed.
    pub fn owner_of(&self, key: u32) -> Option<usize> {
        if self.shard_size == 0 {
            return None;
        }

        let key = key as usize;
        let home = key % self.shard_size;
        if !self.is_failed(home) {
            return Some(home);
        }

        let survivors = self.survivors();
        if survivors == 0 {
            return None;
        }
        let target = key % survivors;
        self.map_index.iter().position(|idx| *idx == Some(target))
    }

    /// Build the take-over predicate for `my_id`.
    ///
    /// Claims a device when its home slot failed and the reduced modulus
    /// over the survivors selects `my_id`. Always false when `my_id` is
    /// itself failed, which also covers the all-failed case.
    pub fn takeover(&self, my_id: usize) -> DevicePredicate {
        let Some(target) = self.map_index(my_id) else {
            return Arc::new(|_: &Device| false);
        };

        // my_id survived, so survivors >= 1
        let survivors = self.survivors();
        let shard_size = self.shard_size;
        let failed = self.failed.clone();

        Arc::new(move |device: &Device| {
            let key = group_key(device) as usize;
            failed.binary_search(&(key % shard_size)).is_ok() && key % survivors == target
        })
    }
}

//! Published coordinator state, read by the admin API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Coordinator lifecycle phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ShardPhase {
    /// Waiting to see the local registration
    #[default]
    Registering,
    /// Waiting for `initializing_shards` healthy members
    WarmingUp,
    /// Fixed delay before the main shard is installed
    Settling,
    /// Main shard installed, every slot healthy
    Steady,
    /// Main shard plus a takeover of failed slots
    TakenOver,
    /// Too few healthy members, nothing collected
    Suspended,
    /// Coordinator exited and released its filters
    Stopped,
}

/// Snapshot of the coordinator, replaced on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStatus {
    pub node_address: String,
    pub shard_id: Option<usize>,
    pub number_of_nodes: usize,
    pub phase: ShardPhase,
    pub healthy_members: usize,
    pub failed_slots: Vec<usize>,
    /// Installed filter names, sorted
    pub filters: Vec<String>,
    /// Whether the most recent membership query succeeded
    pub discovery_ok: bool,
    pub updated_at: DateTime<Utc>,
}

impl ShardStatus {
    pub fn new(node_address: impl Into<String>, number_of_nodes: usize) -> Self {
        Self {
            node_address: node_address.into(),
            shard_id: None,
            number_of_nodes,
            phase: ShardPhase::Registering,
            healthy_members: 0,
            failed_slots: Vec::new(),
            filters: Vec::new(),
            discovery_ok: true,
            updated_at: Utc::now(),
        }
    }

    /// Ready once the node collects its share of devices.
    pub fn is_ready(&self) -> bool {
        matches!(self.phase, ShardPhase::Steady | ShardPhase::TakenOver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_phase_names() {
        assert_eq!(ShardPhase::WarmingUp.to_string(), "warming_up");
        assert_eq!(ShardPhase::from_str("taken_over").unwrap(), ShardPhase::TakenOver);
        assert_eq!(
            serde_json::to_value(ShardPhase::Suspended).unwrap(),
            serde_json::json!("suspended")
        );
    }

    #[test]
    fn test_readiness() {
        let mut status = ShardStatus::new("10.0.0.1:8080", 3);
        assert!(!status.is_ready());
        assert!(status.discovery_ok);

        status.phase = ShardPhase::TakenOver;
        assert!(status.is_ready());
        status.phase = ShardPhase::Suspended;
        assert!(!status.is_ready());
    }
}

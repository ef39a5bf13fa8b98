//! Cluster member model
//!
//! Members are reported by the discovery backend. Their `id` is a small
//! integer encoded as text and doubles as the member's shard slot.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Metadata key a member must carry to take part in sharding.
pub const SHARDS_ENABLED: &str = "shards_enabled";

/// Health status as reported by discovery.
///
/// Only `Passing` is healthy. Unrecognised values are kept verbatim so they
/// can be logged, and are treated as unhealthy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MemberStatus {
    Passing,
    Warning,
    Critical,
    Other(String),
}

impl MemberStatus {
    pub fn as_str(&self) -> &str {
        match self {
            MemberStatus::Passing => "passing",
            MemberStatus::Warning => "warning",
            MemberStatus::Critical => "critical",
            MemberStatus::Other(s) => s,
        }
    }

    pub fn is_passing(&self) -> bool {
        matches!(self, MemberStatus::Passing)
    }
}

impl From<&str> for MemberStatus {
    fn from(value: &str) -> Self {
        match value {
            "passing" => MemberStatus::Passing,
            "warning" => MemberStatus::Warning,
            "critical" => MemberStatus::Critical,
            other => MemberStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for MemberStatus {
    fn from(value: String) -> Self {
        MemberStatus::from(value.as_str())
    }
}

impl From<MemberStatus> for String {
    fn from(value: MemberStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One process in the cluster as seen through discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Shard slot, a non-negative integer encoded as text
    pub id: String,
    /// Address used to recognise the local node
    pub address: String,
    pub status: MemberStatus,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl Member {
    /// Create a passing member that carries the sharding marker.
    pub fn sharded(id: usize, address: impl Into<String>) -> Self {
        let mut meta = HashMap::new();
        meta.insert(SHARDS_ENABLED.to_string(), "true".to_string());
        Self {
            id: id.to_string(),
            address: address.into(),
            status: MemberStatus::Passing,
            meta,
        }
    }

    pub fn with_status(mut self, status: MemberStatus) -> Self {
        self.status = status;
        self
    }

    /// Parsed shard slot, `None` when the id is not a non-negative integer.
    pub fn slot(&self) -> Option<usize> {
        self.id.parse().ok()
    }

    pub fn is_passing(&self) -> bool {
        self.status.is_passing()
    }

    pub fn is_shard_enabled(&self) -> bool {
        self.meta.contains_key(SHARDS_ENABLED)
    }

    /// Healthy and part of the sharding pool.
    pub fn is_healthy_shard(&self) -> bool {
        self.is_passing() && self.is_shard_enabled()
    }
}

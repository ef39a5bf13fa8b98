//! Device model
//!
//! A device is a telemetry source owned by configuration. The shard engine
//! only looks at `host` and `group_id`; the remaining fields travel with the
//! device so the collector can open its subscription.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A configured telemetry source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Hostname or address of the device.
    pub host: String,

    /// Explicit shard group. Zero means "derive from host".
    #[serde(default, alias = "groupID")]
    pub group_id: u32,

    /// Streaming telemetry port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Telemetry service/vendor driver name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    /// Arbitrary labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Device {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            group_id: 0,
            port: None,
            service: None,
            labels: BTreeMap::new(),
        }
    }

    /// Pin the device to an explicit shard group.
    pub fn with_group(mut self, group_id: u32) -> Self {
        self.group_id = group_id;
        self
    }
}

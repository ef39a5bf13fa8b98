//! Fleet Configuration
//!
//! Centralized configuration for a telefleet node. Values come from the
//! built-in defaults, then an optional YAML file, then environment variable
//! overrides. The CLI applies its own flags on top of the result.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use strum::{Display, EnumString};
use telefleet_core::{Device, Member};
use thiserror::Error;

/// Configuration rejected by [`FleetConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("number_of_nodes must be at least 1")]
    NoNodes,
    #[error("{field} ({value}) cannot exceed number_of_nodes ({nodes})")]
    ExceedsNodes {
        field: &'static str,
        value: usize,
        nodes: usize,
    },
    #[error("node_address must not be empty")]
    MissingAddress,
    #[error("registration_attempts must be at least 1")]
    NoRegistrationAttempts,
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("etcd backend requires at least one endpoint")]
    NoEtcdEndpoints,
    #[error("device host {0} is configured more than once")]
    DuplicateDevice(String),
}

/// Membership registry implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DiscoveryBackend {
    /// Lease-backed member records in etcd
    #[default]
    Etcd,
    /// In-process member list, for single-node and lab setups
    Static,
}

/// Cluster shape and shard thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster identifier for namespace isolation (env: CLUSTER_ID)
    pub cluster_id: String,

    /// Address this node registers under (env: NODE_ADDRESS)
    pub node_address: String,

    /// Total expected cluster size (env: NUMBER_OF_NODES)
    pub number_of_nodes: usize,

    /// Healthy members required before the main shard is installed
    /// (env: INITIALIZING_SHARDS)
    pub initializing_shards: usize,

    /// Healthy members required to take over instead of suspending
    /// (env: MINIMUM_SHARDS)
    pub minimum_shards: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_id: "default".to_string(),
            node_address: "127.0.0.1:8080".to_string(),
            number_of_nodes: 1,
            initializing_shards: 1,
            minimum_shards: 1,
        }
    }
}

/// Coordinator timers. Durations are written in seconds in YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Attempts to observe the local registration before giving up
    pub registration_attempts: u32,

    #[serde(with = "duration_secs")]
    pub registration_interval: Duration,

    /// Poll interval while waiting for `initializing_shards` members
    #[serde(with = "duration_secs")]
    pub warmup_interval: Duration,

    /// Delay between warm-up completion and installing the main shard
    #[serde(with = "duration_secs")]
    pub settle_window: Duration,

    /// Delay between installing the main shard and the one-shot takeover check
    #[serde(with = "duration_secs")]
    pub takeover_delay: Duration,

    /// Tick of the steady loop; changes are acted on at the next tick
    #[serde(with = "duration_secs")]
    pub watch_interval: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            registration_attempts: 15,
            registration_interval: Duration::from_secs(1),
            warmup_interval: Duration::from_secs(10),
            settle_window: Duration::from_secs(35),
            takeover_delay: Duration::from_secs(35),
            watch_interval: Duration::from_secs(30),
        }
    }
}

/// Discovery backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Backend to use (env: DISCOVERY_BACKEND)
    pub backend: DiscoveryBackend,

    /// Etcd endpoints (env: ETCD_ENDPOINTS, comma-separated)
    pub etcd_endpoints: Vec<String>,

    /// TTL for the member lease (seconds)
    pub lease_ttl: i64,

    /// Interval for lease keep-alive (1/3 of TTL recommended)
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,

    /// Upper bound on a single membership query
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Delay before re-opening a failed watch stream
    #[serde(with = "duration_secs")]
    pub reconnect_delay: Duration,

    #[serde(with = "duration_secs")]
    pub etcd_backoff_initial: Duration,

    #[serde(with = "duration_secs")]
    pub etcd_backoff_max: Duration,

    #[serde(with = "duration_secs")]
    pub etcd_backoff_max_elapsed: Duration,

    pub etcd_backoff_multiplier: f64,

    /// Peers preloaded into the static backend
    pub static_members: Vec<Member>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            backend: DiscoveryBackend::Etcd,
            etcd_endpoints: vec!["http://127.0.0.1:2379".to_string()],
            lease_ttl: 15,
            keepalive_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(3),
            reconnect_delay: Duration::from_secs(5),
            etcd_backoff_initial: Duration::from_secs(1),
            etcd_backoff_max: Duration::from_secs(10),
            etcd_backoff_max_elapsed: Duration::from_secs(60),
            etcd_backoff_multiplier: 2.0,
            static_members: Vec::new(),
        }
    }
}

/// Admin HTTP settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Whether to serve the admin API at all
    pub enabled: bool,

    /// Listen address (env: API_BIND_ADDR)
    pub bind_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Complete node configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub cluster: ClusterConfig,
    pub timers: TimerConfig,
    pub discovery: DiscoveryConfig,
    pub api: ApiConfig,
    pub devices: Vec<Device>,
}

impl FleetConfig {
    /// Load defaults, the optional YAML file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::from_yaml(&raw)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    /// Override from environment variables.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override from any key lookup using the environment variable names.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(cluster_id) = lookup("CLUSTER_ID") {
            self.cluster.cluster_id = cluster_id;
        }

        if let Some(address) = lookup("NODE_ADDRESS") {
            self.cluster.node_address = address;
        }

        if let Some(parsed) = lookup("NUMBER_OF_NODES").and_then(|v| v.parse().ok()) {
            self.cluster.number_of_nodes = parsed;
        }

        if let Some(parsed) = lookup("INITIALIZING_SHARDS").and_then(|v| v.parse().ok()) {
            self.cluster.initializing_shards = parsed;
        }

        if let Some(parsed) = lookup("MINIMUM_SHARDS").and_then(|v| v.parse().ok()) {
            self.cluster.minimum_shards = parsed;
        }

        if let Some(parsed) = lookup("DISCOVERY_BACKEND").and_then(|v| v.parse().ok()) {
            self.discovery.backend = parsed;
        }

        if let Some(endpoints) = lookup("ETCD_ENDPOINTS") {
            self.discovery.etcd_endpoints = endpoints
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(bind_addr) = lookup("API_BIND_ADDR") {
            self.api.bind_addr = bind_addr;
        }
    }

    /// Reject configurations the coordinator cannot run safely with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cluster = &self.cluster;
        if cluster.number_of_nodes == 0 {
            return Err(ConfigError::NoNodes);
        }
        if cluster.node_address.trim().is_empty() {
            return Err(ConfigError::MissingAddress);
        }
        for (field, value) in [
            ("initializing_shards", cluster.initializing_shards),
            ("minimum_shards", cluster.minimum_shards),
        ] {
            if value > cluster.number_of_nodes {
                return Err(ConfigError::ExceedsNodes {
                    field,
                    value,
                    nodes: cluster.number_of_nodes,
                });
            }
        }
        if self.timers.registration_attempts == 0 {
            return Err(ConfigError::NoRegistrationAttempts);
        }
        // Used as tick periods and deadlines
        for (field, value) in [
            ("timers.warmup_interval", self.timers.warmup_interval),
            ("timers.watch_interval", self.timers.watch_interval),
            ("discovery.keepalive_interval", self.discovery.keepalive_interval),
            ("discovery.request_timeout", self.discovery.request_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroInterval(field));
            }
        }
        if self.discovery.backend == DiscoveryBackend::Etcd && self.discovery.etcd_endpoints.is_empty() {
            return Err(ConfigError::NoEtcdEndpoints);
        }

        let mut hosts = HashSet::new();
        for device in &self.devices {
            if !hosts.insert(device.host.as_str()) {
                return Err(ConfigError::DuplicateDevice(device.host.clone()));
            }
        }
        Ok(())
    }
}

/// Durations as (possibly fractional) seconds.
mod duration_secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(D::Error::custom(
                "duration must be a non-negative number of seconds",
            ));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

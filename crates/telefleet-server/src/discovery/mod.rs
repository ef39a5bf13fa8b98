//! Membership Discovery
//!
//! The coordinator sees the cluster only through the [`Discovery`] trait:
//! a point-in-time member list plus a best-effort change signal.
//!
//! Backends:
//! - `etcd`: lease-backed member records, lowest free id claimed with a
//!   create-if-absent transaction
//! - `static_members`: in-process member list for single-node setups and tests

pub mod etcd;
pub mod static_members;

use crate::signal::SignalSender;
use std::future::Future;
use telefleet_core::Member;
use thiserror::Error;

pub use etcd::EtcdDiscovery;
pub use static_members::{StaticDiscovery, StaticMembership};

/// Errors surfaced by a discovery backend.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("etcd request failed: {0}")]
    Etcd(#[from] etcd_client::Error),

    #[error("invalid member record at {key}: {source}")]
    InvalidRecord {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode member record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no free member id below {0}")]
    NoFreeSlot(usize),

    #[error("discovery request timed out")]
    Timeout,

    #[error("discovery unavailable: {0}")]
    Unavailable(String),
}

/// Source of cluster membership.
pub trait Discovery: Send + Sync + 'static {
    /// Make the local node visible, claiming a member id.
    fn register(&self) -> impl Future<Output = Result<Member, DiscoveryError>> + Send;

    /// Current member list.
    fn instances(&self) -> impl Future<Output = Result<Vec<Member>, DiscoveryError>> + Send;

    /// Start signalling membership changes into `notifier`.
    ///
    /// Delivery is best effort and coalescing; the receiver must re-query
    /// [`Discovery::instances`] rather than rely on individual signals.
    fn watch(&self, notifier: SignalSender) -> impl Future<Output = Result<(), DiscoveryError>> + Send;

    /// Remove the local node. Best effort, called once on shutdown.
    fn deregister(&self) -> impl Future<Output = Result<(), DiscoveryError>> + Send;
}

/// Lowest id in `[0, limit)` not used by any of `members`.
pub(crate) fn lowest_free_id(members: &[Member], limit: usize) -> Option<usize> {
    (0..limit).find(|id| !members.iter().any(|m| m.slot() == Some(*id)))
}

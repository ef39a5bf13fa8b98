//! Static Membership
//!
//! In-process member list shared by every node handle created from it.
//! Used for single-node deployments (the member list comes from the config
//! file) and to drive multi-node clusters in tests. Every mutation signals
//! the registered watchers.

use super::{lowest_free_id, Discovery, DiscoveryError};
use crate::signal::SignalSender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use telefleet_core::{Member, MemberStatus};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Shared member list.
#[derive(Clone)]
pub struct StaticMembership {
    inner: Arc<Inner>,
}

struct Inner {
    number_of_nodes: usize,
    members: RwLock<Vec<Member>>,
    watchers: Mutex<Vec<SignalSender>>,
    unavailable: AtomicBool,
}

impl StaticMembership {
    /// Create a membership with ids limited to `[0, number_of_nodes)`.
    pub fn new(number_of_nodes: usize, members: Vec<Member>) -> Self {
        Self {
            inner: Arc::new(Inner {
                number_of_nodes,
                members: RwLock::new(members),
                watchers: Mutex::new(Vec::new()),
                unavailable: AtomicBool::new(false),
            }),
        }
    }

    /// A discovery handle for the node at `address`.
    pub fn discovery_for(&self, address: impl Into<String>) -> StaticDiscovery {
        StaticDiscovery {
            membership: self.clone(),
            address: address.into(),
        }
    }

    pub async fn members(&self) -> Vec<Member> {
        self.inner.members.read().await.clone()
    }

    /// Insert a member or replace the member with the same id.
    pub async fn upsert(&self, member: Member) {
        {
            let mut members = self.inner.members.write().await;
            match members.iter_mut().find(|m| m.id == member.id) {
                Some(existing) => *existing = member,
                None => members.push(member),
            }
        }
        self.notify_watchers().await;
    }

    /// Change a member's health. Returns whether the id exists.
    pub async fn set_status(&self, id: &str, status: impl Into<MemberStatus>) -> bool {
        let found = {
            let mut members = self.inner.members.write().await;
            match members.iter_mut().find(|m| m.id == id) {
                Some(member) => {
                    member.status = status.into();
                    true
                }
                None => false,
            }
        };
        if found {
            self.notify_watchers().await;
        }
        found
    }

    /// Drop a member. Returns whether the id existed.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut members = self.inner.members.write().await;
            let before = members.len();
            members.retain(|m| m.id != id);
            members.len() != before
        };
        if removed {
            self.notify_watchers().await;
        }
        removed
    }

    /// Make every query fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::Release);
    }

    fn check_available(&self) -> Result<(), DiscoveryError> {
        if self.inner.unavailable.load(Ordering::Acquire) {
            return Err(DiscoveryError::Unavailable(
                "static membership marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    async fn notify_watchers(&self) {
        let mut watchers = self.inner.watchers.lock().await;
        watchers.retain(|w| !w.is_closed());
        for watcher in watchers.iter() {
            watcher.notify();
        }
    }
}

/// Discovery handle bound to one local address.
#[derive(Clone)]
pub struct StaticDiscovery {
    membership: StaticMembership,
    address: String,
}

impl Discovery for StaticDiscovery {
    async fn register(&self) -> Result<Member, DiscoveryError> {
        self.membership.check_available()?;

        let member = {
            let mut members = self.membership.inner.members.write().await;
            if let Some(existing) = members.iter().find(|m| m.address == self.address) {
                return Ok(existing.clone());
            }

            let limit = self.membership.inner.number_of_nodes;
            let id = lowest_free_id(&members, limit).ok_or(DiscoveryError::NoFreeSlot(limit))?;
            let member = Member::sharded(id, self.address.clone());
            members.push(member.clone());
            member
        };

        debug!(address = %self.address, id = %member.id, "Static member registered");
        self.membership.notify_watchers().await;
        Ok(member)
    }

    async fn instances(&self) -> Result<Vec<Member>, DiscoveryError> {
        self.membership.check_available()?;
        Ok(self.membership.members().await)
    }

    async fn watch(&self, notifier: SignalSender) -> Result<(), DiscoveryError> {
        self.membership.inner.watchers.lock().await.push(notifier);
        Ok(())
    }

    async fn deregister(&self) -> Result<(), DiscoveryError> {
        let removed = {
            let mut members = self.membership.inner.members.write().await;
            let before = members.len();
            members.retain(|m| m.address != self.address);
            members.len() != before
        };
        if removed {
            self.membership.notify_watchers().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal;

    #[tokio::test]
    async fn test_register_claims_lowest_free_id() {
        let membership = StaticMembership::new(3, vec![Member::sharded(0, "a")]);

        let b = membership.discovery_for("b").register().await.unwrap();
        let c = membership.discovery_for("c").register().await.unwrap();
        assert_eq!(b.id, "1");
        assert_eq!(c.id, "2");
        assert!(b.is_healthy_shard());

        let err = membership.discovery_for("d").register().await;
        assert!(matches!(err, Err(DiscoveryError::NoFreeSlot(3))));
    }

    #[tokio::test]
    async fn test_register_is_idempotent_per_address() {
        let membership = StaticMembership::new(2, Vec::new());
        let discovery = membership.discovery_for("a");
        let first = discovery.register().await.unwrap();
        let second = discovery.register().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(membership.members().await.len(), 1);
    }

    #[tokio::test]
    async fn test_mutations_notify_watchers() {
        let membership = StaticMembership::new(2, vec![Member::sharded(0, "a")]);
        let discovery = membership.discovery_for("a");
        let (tx, mut rx) = signal::channel("test", 8);
        discovery.watch(tx).await.unwrap();

        assert!(membership.set_status("0", "critical").await);
        assert!(!membership.set_status("9", "critical").await);
        membership.upsert(Member::sharded(1, "b")).await;
        assert!(membership.remove("1").await);

        assert_eq!(rx.drain(), 3);
        let members = discovery.instances().await.unwrap();
        assert_eq!(members[0].status, MemberStatus::Critical);
    }

    #[tokio::test]
    async fn test_unavailable_fails_queries() {
        let membership = StaticMembership::new(1, Vec::new());
        let discovery = membership.discovery_for("a");
        membership.set_unavailable(true);
        assert!(matches!(
            discovery.instances().await,
            Err(DiscoveryError::Unavailable(_))
        ));
        assert!(discovery.register().await.is_err());

        membership.set_unavailable(false);
        assert!(discovery.instances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deregister_removes_local_member() {
        let membership = StaticMembership::new(2, Vec::new());
        let discovery = membership.discovery_for("a");
        discovery.register().await.unwrap();
        discovery.deregister().await.unwrap();
        assert!(membership.members().await.is_empty());
    }
}

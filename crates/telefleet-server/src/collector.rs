//! Subscription Tracker
//!
//! Stands in for the polling subsystem: on every refresh request it
//! re-reads the filtered device list and reconciles its active subscription
//! set against it. Subscribing to a device means this node now collects it.

use crate::filter::FilterRegistry;
use crate::observability::{events, metrics};
use crate::signal::{wait_for_shutdown, SignalReceiver};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use telefleet_core::Device;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

/// Hosts that entered and left the active set in one refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl SubscriptionDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Read handle on the active subscriptions, shared with the admin API.
#[derive(Clone, Default)]
pub struct ActiveDevices {
    devices: Arc<RwLock<Vec<Device>>>,
}

impl ActiveDevices {
    /// Devices currently collected, in configuration order.
    pub async fn snapshot(&self) -> Vec<Device> {
        self.devices.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }
}

pub struct SubscriptionTracker {
    registry: Arc<FilterRegistry>,
    refresh_rx: SignalReceiver,
    active: ActiveDevices,
}

impl SubscriptionTracker {
    pub fn new(registry: Arc<FilterRegistry>, refresh_rx: SignalReceiver) -> Self {
        Self {
            registry,
            refresh_rx,
            active: ActiveDevices::default(),
        }
    }

    pub fn active(&self) -> ActiveDevices {
        self.active.clone()
    }

    /// Reconcile the active set with the registry.
    pub async fn refresh(&self) -> SubscriptionDiff {
        let selected = self.registry.devices().await;
        let mut active = self.active.devices.write().await;

        let before: BTreeSet<&str> = active.iter().map(|d| d.host.as_str()).collect();
        let after: BTreeSet<&str> = selected.iter().map(|d| d.host.as_str()).collect();

        let diff = SubscriptionDiff {
            added: after.difference(&before).map(|h| h.to_string()).collect(),
            removed: before.difference(&after).map(|h| h.to_string()).collect(),
        };

        for host in &diff.removed {
            events::device_unsubscribed(host);
        }
        for host in &diff.added {
            events::device_subscribed(host);
        }

        metrics::set_owned_devices(selected.len());
        *active = selected;
        diff
    }

    /// Refresh on every signal until shutdown or until the senders are gone.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Subscription tracker started");
        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                signal = self.refresh_rx.recv() => {
                    if signal.is_none() {
                        break;
                    }
                    let coalesced = self.refresh_rx.drain();
                    let diff = self.refresh().await;
                    debug!(
                        added = diff.added.len(),
                        removed = diff.removed.len(),
                        coalesced = coalesced,
                        "Subscriptions refreshed"
                    );
                }
            }
        }
        info!("Subscription tracker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal;

    fn registry() -> Arc<FilterRegistry> {
        Arc::new(FilterRegistry::new(
            ["core1.lax", "core1.bur", "core2.bur"]
                .into_iter()
                .map(Device::new)
                .collect(),
        ))
    }

    #[tokio::test]
    async fn test_refresh_diffs_active_set() {
        let registry = registry();
        let (_tx, rx) = signal::channel("update_request", 1);
        let tracker = SubscriptionTracker::new(registry.clone(), rx);

        assert!(tracker.refresh().await.is_empty());

        registry
            .add_filter("bur", Arc::new(|d: &Device| d.host.ends_with("bur")))
            .await;
        let diff = tracker.refresh().await;
        assert_eq!(diff.added, vec!["core1.bur", "core2.bur"]);
        assert!(diff.removed.is_empty());

        registry.remove_filter("bur").await;
        registry
            .add_filter("core1", Arc::new(|d: &Device| d.host.starts_with("core1")))
            .await;
        let diff = tracker.refresh().await;
        assert_eq!(diff.added, vec!["core1.lax"]);
        assert_eq!(diff.removed, vec!["core2.bur"]);

        let hosts: Vec<String> = tracker
            .active()
            .snapshot()
            .await
            .into_iter()
            .map(|d| d.host)
            .collect();
        assert_eq!(hosts, vec!["core1.lax", "core1.bur"]);
    }

    #[tokio::test]
    async fn test_run_refreshes_on_signal_and_stops() {
        let registry = registry();
        let (tx, rx) = signal::channel("update_request", 1);
        let tracker = SubscriptionTracker::new(registry.clone(), rx);
        let active = tracker.active();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(tracker.run(shutdown_rx));

        registry.add_filter("all", Arc::new(|_: &Device| true)).await;
        assert!(tx.notify());

        for _ in 0..100 {
            if active.len().await == 3 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(active.len().await, 3);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_run_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let (_tx, rx) = signal::channel("update_request", 1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = SubscriptionTracker::new(registry(), rx).run(shutdown_rx);
        assert_send(&run);
    }

    #[tokio::test]
    async fn test_run_stops_when_senders_dropped() {
        let (tx, rx) = signal::channel("update_request", 1);
        let tracker = SubscriptionTracker::new(registry(), rx);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(tx);
        tracker.run(shutdown_rx).await;
    }
}

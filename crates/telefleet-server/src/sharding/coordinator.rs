//! ShardCoordinator
//!
//! Control loop that registers the local identity, waits for the cluster to
//! warm up, installs the main shard and then keeps the takeover filter in
//! line with membership health.

use super::status::{ShardPhase, ShardStatus};
use super::{EXTRA_SHARD, MAIN_SHARD};
use crate::config::{ClusterConfig, TimerConfig};
use crate::discovery::Discovery;
use crate::filter::FilterRegistry;
use crate::observability::{events, metrics};
use crate::signal::{pause, wait_for_shutdown, SignalReceiver, SignalSender};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use telefleet_core::{healthy_count, main_shard, Member, SlotMap};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("{address} was not seen as a passing member after {attempts} attempts")]
    RegistrationTimeout { address: String, attempts: u32 },
}

/// State shared with the delayed takeover task.
struct Shared<D> {
    discovery: Arc<D>,
    registry: Arc<FilterRegistry>,
    update_tx: SignalSender,
    status: watch::Sender<ShardStatus>,
    suspended: AtomicBool,
    cluster: ClusterConfig,
    /// Held from the membership query until the filters are written, so a
    /// stale snapshot never lands after a newer decision.
    ownership: Mutex<()>,
}

/// Drives shard ownership for the local node.
///
/// Responsibilities:
/// - Adopt the member id assigned by discovery
/// - Install `mainShard` once the cluster has warmed up and settled
/// - Install `extraShard` for failed slots, or suspend when too few
///   members are healthy
/// - Request a device refresh after every ownership change
pub struct ShardCoordinator<D: Discovery> {
    shared: Arc<Shared<D>>,
    change_rx: SignalReceiver,
    timers: TimerConfig,
}

impl<D: Discovery> ShardCoordinator<D> {
    pub fn new(
        discovery: Arc<D>,
        registry: Arc<FilterRegistry>,
        update_tx: SignalSender,
        change_rx: SignalReceiver,
        cluster: ClusterConfig,
        timers: TimerConfig,
    ) -> Self {
        let (status, _) = watch::channel(ShardStatus::new(
            cluster.node_address.clone(),
            cluster.number_of_nodes,
        ));
        Self {
            shared: Arc::new(Shared {
                discovery,
                registry,
                update_tx,
                status,
                suspended: AtomicBool::new(false),
                cluster,
                ownership: Mutex::new(()),
            }),
            change_rx,
            timers,
        }
    }

    /// Receiver for status snapshots.
    pub fn subscribe(&self) -> watch::Receiver<ShardStatus> {
        self.shared.status.subscribe()
    }

    /// Run until shutdown, then remove the installed filters.
    ///
    /// Only a registration timeout is returned as an error; discovery
    /// failures after registration are logged and retried.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), CoordinatorError> {
        let result = self.drive(&mut shutdown).await;
        self.shared.release().await;
        result
    }

    async fn drive(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<(), CoordinatorError> {
        let Some(my_id) = self.await_registration(shutdown).await? else {
            return Ok(());
        };

        if !self.warm_up(shutdown).await {
            return Ok(());
        }

        self.shared
            .publish(|status| status.phase = ShardPhase::Settling)
            .await;
        debug!(settle = ?self.timers.settle_window, "Settling before installing main shard");
        if !pause(shutdown, self.timers.settle_window).await {
            return Ok(());
        }

        self.shared.install_main(my_id).await;

        let delayed = self.spawn_delayed_takeover(my_id, shutdown.clone());
        self.steady(my_id, shutdown).await;

        delayed.abort();
        let _ = delayed.await;
        Ok(())
    }

    /// Poll membership until the local address shows up as passing.
    ///
    /// Returns `Ok(None)` when shutdown arrives first.
    async fn await_registration(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<usize>, CoordinatorError> {
        let cluster = &self.shared.cluster;
        let attempts = self.timers.registration_attempts.max(1);

        for attempt in 1..=attempts {
            match self.shared.discovery.instances().await {
                Ok(members) => {
                    if let Some(id) = local_slot(&members, cluster) {
                        events::registered(&cluster.node_address, id, attempt);
                        self.shared
                            .publish(|status| {
                                status.shard_id = Some(id);
                                status.phase = ShardPhase::WarmingUp;
                                status.discovery_ok = true;
                            })
                            .await;
                        return Ok(Some(id));
                    }
                    debug!(attempt = attempt, "Local member not visible yet");
                }
                Err(e) => {
                    metrics::record_discovery_error("instances");
                    warn!(attempt = attempt, error = %e, "Membership query failed during registration");
                }
            }

            if attempt < attempts && !pause(shutdown, self.timers.registration_interval).await {
                return Ok(None);
            }
        }

        Err(CoordinatorError::RegistrationTimeout {
            address: cluster.node_address.clone(),
            attempts,
        })
    }

    /// Wait until `initializing_shards` healthy members are visible.
    ///
    /// Returns `false` when shutdown arrives first.
    async fn warm_up(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let required = self.shared.cluster.initializing_shards;
        loop {
            match self.shared.discovery.instances().await {
                Ok(members) => {
                    let healthy = healthy_count(&members);
                    events::warmup_progress(healthy, required);
                    self.shared
                        .publish(|status| {
                            status.healthy_members = healthy;
                            status.discovery_ok = true;
                        })
                        .await;
                    if healthy >= required {
                        return true;
                    }
                }
                Err(e) => {
                    metrics::record_discovery_error("instances");
                    warn!(error = %e, "Membership query failed during warm-up");
                    self.shared
                        .publish(|status| status.discovery_ok = false)
                        .await;
                }
            }

            if !pause(shutdown, self.timers.warmup_interval).await {
                return false;
            }
        }
    }

    fn spawn_delayed_takeover(
        &self,
        my_id: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let shared = self.shared.clone();
        let delay = self.timers.takeover_delay;
        tokio::spawn(async move {
            if pause(&mut shutdown, delay).await {
                shared.delayed_takeover(my_id).await;
            }
        })
    }

    /// Act on membership changes at most once per watch interval.
    async fn steady(&mut self, my_id: usize, shutdown: &mut watch::Receiver<bool>) {
        let period = self.timers.watch_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut dirty = false;
        let mut notifications_open = true;

        loop {
            tokio::select! {
                _ = wait_for_shutdown(shutdown) => break,

                signal = self.change_rx.recv(), if notifications_open => match signal {
                    Some(()) => dirty = true,
                    None => {
                        warn!("Membership notifications closed, relying on the watch interval");
                        notifications_open = false;
                        dirty = true;
                    }
                },

                _ = ticker.tick() => {
                    if dirty && self.shared.rebalance(my_id).await {
                        dirty = !notifications_open;
                    }
                }
            }
        }

        info!("Shard coordinator stopping");
    }
}

impl<D: Discovery> Shared<D> {
    /// Replace the published status and refresh its filter list.
    async fn publish(&self, update: impl FnOnce(&mut ShardStatus)) {
        let filters = self.registry.filter_names().await;
        self.status.send_modify(|status| {
            update(status);
            status.filters = filters;
            status.updated_at = Utc::now();
        });
    }

    async fn install_main(&self, my_id: usize) {
        let n = self.cluster.number_of_nodes;
        self.registry.add_filter(MAIN_SHARD, main_shard(my_id, n)).await;
        events::main_shard_installed(my_id, n);
        self.update_tx.notify();
        self.publish(|status| status.phase = ShardPhase::Steady).await;
    }

    /// One-shot takeover check after the main shard went in.
    async fn delayed_takeover(&self, my_id: usize) {
        let _ownership = self.ownership.lock().await;
        if self.suspended.load(Ordering::Acquire) {
            debug!("Suspended, skipping delayed takeover");
            return;
        }

        let members = match self.discovery.instances().await {
            Ok(members) => members,
            Err(e) => {
                metrics::record_discovery_error("instances");
                warn!(error = %e, "Membership query failed during delayed takeover");
                self.publish(|status| status.discovery_ok = false).await;
                return;
            }
        };

        let slots = SlotMap::from_members(self.cluster.number_of_nodes, &members);
        let healthy = healthy_count(&members);
        metrics::set_membership(healthy, slots.failed().len());

        if slots.all_passing() || healthy < self.cluster.minimum_shards {
            debug!(
                healthy = healthy,
                failed_slots = ?slots.failed(),
                "Delayed takeover not needed"
            );
            return;
        }

        self.install_takeover(my_id, &slots, "delayed").await;
        self.update_tx.notify();
        self.publish(|status| {
            status.phase = ShardPhase::TakenOver;
            status.healthy_members = healthy;
            status.failed_slots = slots.failed().to_vec();
            status.discovery_ok = true;
        })
        .await;
    }

    /// Recompute ownership from a fresh snapshot.
    ///
    /// Returns `false` when membership could not be read; installed filters
    /// are left untouched in that case.
    async fn rebalance(&self, my_id: usize) -> bool {
        let _ownership = self.ownership.lock().await;
        let members = match self.discovery.instances().await {
            Ok(members) => members,
            Err(e) => {
                metrics::record_discovery_error("instances");
                metrics::record_rebalance("error");
                warn!(error = %e, "Membership query failed, keeping current filters");
                self.publish(|status| status.discovery_ok = false).await;
                return false;
            }
        };

        let n = self.cluster.number_of_nodes;
        let minimum = self.cluster.minimum_shards;
        warn_inconsistent(&members, n);

        let slots = SlotMap::from_members(n, &members);
        let healthy = healthy_count(&members);
        metrics::set_membership(healthy, slots.failed().len());

        let phase = if healthy >= minimum {
            if self.suspended.load(Ordering::Acquire) {
                self.unsuspend(my_id, healthy).await;
            }
            self.install_takeover(my_id, &slots, "steady").await;
            if slots.all_passing() {
                ShardPhase::Steady
            } else {
                ShardPhase::TakenOver
            }
        } else {
            self.suspend(healthy).await;
            ShardPhase::Suspended
        };

        metrics::record_rebalance("ok");
        self.update_tx.notify();
        self.publish(|status| {
            status.phase = phase;
            status.healthy_members = healthy;
            status.failed_slots = slots.failed().to_vec();
            status.discovery_ok = true;
        })
        .await;
        true
    }

    async fn install_takeover(&self, my_id: usize, slots: &SlotMap, source: &'static str) {
        self.registry.add_filter(EXTRA_SHARD, slots.takeover(my_id)).await;
        if !slots.all_passing() {
            metrics::record_takeover(source);
            events::takeover_installed(my_id, slots.failed(), slots.survivors(), source);
        }
    }

    async fn suspend(&self, healthy: usize) {
        self.registry.remove_filter(MAIN_SHARD).await;
        self.registry.remove_filter(EXTRA_SHARD).await;
        if !self.suspended.swap(true, Ordering::AcqRel) {
            metrics::set_suspended(true);
            events::suspended(healthy, self.cluster.minimum_shards);
        }
    }

    /// Reinstall the main shard only; the caller installs the takeover.
    async fn unsuspend(&self, my_id: usize, healthy: usize) {
        self.registry
            .add_filter(MAIN_SHARD, main_shard(my_id, self.cluster.number_of_nodes))
            .await;
        self.suspended.store(false, Ordering::Release);
        metrics::set_suspended(false);
        events::unsuspended(healthy, self.cluster.minimum_shards);
    }

    /// Remove everything this coordinator installed.
    async fn release(&self) {
        let _ownership = self.ownership.lock().await;
        let removed_main = self.registry.remove_filter(MAIN_SHARD).await;
        let removed_extra = self.registry.remove_filter(EXTRA_SHARD).await;
        if removed_main || removed_extra {
            self.update_tx.notify();
        }
        self.publish(|status| status.phase = ShardPhase::Stopped).await;
        debug!("Shard filters released");
    }
}

/// Slot of the passing member registered under the local address.
fn local_slot(members: &[Member], cluster: &ClusterConfig) -> Option<usize> {
    let member = members
        .iter()
        .find(|m| m.address == cluster.node_address && m.is_passing())?;
    match member.slot().filter(|id| *id < cluster.number_of_nodes) {
        Some(id) => Some(id),
        None => {
            warn!(id = %member.id, "Local member id is outside the shard range");
            None
        }
    }
}

/// Log ids the slot layout skips or resolves by last write.
fn warn_inconsistent(members: &[Member], number_of_nodes: usize) {
    let mut seen = HashSet::new();
    for member in members.iter().filter(|m| m.is_shard_enabled()) {
        match member.slot() {
            Some(id) if id < number_of_nodes => {
                if !seen.insert(id) {
                    warn!(id = id, address = %member.address, "Duplicate member id, last registration wins");
                }
            }
            _ => warn!(id = %member.id, address = %member.address, "Ignoring member with invalid id"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DiscoveryError, StaticMembership};
    use crate::signal;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;
    use telefleet_core::Device;

    /// Six devices pinned to groups 1..=6. With three slots, slot 0 owns
    /// dev3 and dev6; when slot 2 fails, slot 0 also takes dev2 and slot 1
    /// takes dev5.
    fn devices() -> Vec<Device> {
        (1..=6)
            .map(|g| Device::new(format!("dev{g}")).with_group(g))
            .collect()
    }

    fn cluster(address: &str, nodes: usize, initializing: usize, minimum: usize) -> ClusterConfig {
        ClusterConfig {
            cluster_id: "test".to_string(),
            node_address: address.to_string(),
            number_of_nodes: nodes,
            initializing_shards: initializing,
            minimum_shards: minimum,
        }
    }

    struct Harness {
        registry: Arc<FilterRegistry>,
        status: watch::Receiver<ShardStatus>,
        update_rx: SignalReceiver,
        shutdown_tx: watch::Sender<bool>,
        handle: JoinHandle<Result<(), CoordinatorError>>,
    }

    impl Harness {
        async fn start(membership: &StaticMembership, cluster: ClusterConfig) -> Self {
            let discovery = Arc::new(membership.discovery_for(cluster.node_address.clone()));
            Self::start_with(discovery, cluster).await
        }

        async fn start_with<D: Discovery>(discovery: Arc<D>, cluster: ClusterConfig) -> Self {
            let registry = Arc::new(FilterRegistry::new(devices()));
            let (update_tx, update_rx) = signal::channel("update_request", 1);
            let (change_tx, change_rx) = signal::channel("membership_change", 1);
            discovery.watch(change_tx).await.unwrap();

            let coordinator = ShardCoordinator::new(
                discovery,
                registry.clone(),
                update_tx,
                change_rx,
                cluster,
                TimerConfig::default(),
            );
            let status = coordinator.subscribe();
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let handle = tokio::spawn(coordinator.run(shutdown_rx));

            Self {
                registry,
                status,
                update_rx,
                shutdown_tx,
                handle,
            }
        }

        async fn owned(&self) -> Vec<String> {
            self.registry
                .devices()
                .await
                .into_iter()
                .map(|d| d.host)
                .collect()
        }

        fn phase(&self) -> ShardPhase {
            self.status.borrow().phase
        }
    }

    /// Static discovery whose next snapshot is taken immediately but handed
    /// back only after `lag_secs`.
    struct LaggingDiscovery {
        inner: crate::discovery::StaticDiscovery,
        lag_secs: AtomicU64,
    }

    impl Discovery for LaggingDiscovery {
        async fn register(&self) -> Result<Member, DiscoveryError> {
            self.inner.register().await
        }

        async fn instances(&self) -> Result<Vec<Member>, DiscoveryError> {
            let members = self.inner.instances().await;
            let lag = self.lag_secs.swap(0, Ordering::AcqRel);
            if lag > 0 {
                tokio::time::sleep(Duration::from_secs(lag)).await;
            }
            members
        }

        async fn watch(&self, notifier: SignalSender) -> Result<(), DiscoveryError> {
            self.inner.watch(notifier).await
        }

        async fn deregister(&self) -> Result<(), DiscoveryError> {
            self.inner.deregister().await
        }
    }

    fn three_members() -> Vec<Member> {
        vec![
            Member::sharded(0, "a"),
            Member::sharded(1, "b"),
            Member::sharded(2, "c"),
        ]
    }

    async fn sleep_secs(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_timeout() {
        let membership = StaticMembership::new(1, Vec::new());
        let harness = Harness::start(&membership, cluster("a", 1, 1, 1)).await;

        let started = Instant::now();
        let result = harness.handle.await.unwrap();
        let elapsed = started.elapsed();

        assert!(matches!(
            result,
            Err(CoordinatorError::RegistrationTimeout { attempts: 15, .. })
        ));
        assert!(elapsed >= Duration::from_secs(14));
        assert!(elapsed < Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_adopts_id_once_passing() {
        let membership = StaticMembership::new(2, vec![
            Member::sharded(1, "a").with_status("critical".into()),
            Member::sharded(0, "b"),
        ]);
        let harness = Harness::start(&membership, cluster("a", 2, 1, 1)).await;

        sleep_secs(3).await;
        assert_eq!(harness.phase(), ShardPhase::Registering);

        membership.set_status("1", "passing").await;
        sleep_secs(2).await;
        assert_eq!(harness.status.borrow().shard_id, Some(1));
        assert_eq!(harness.phase(), ShardPhase::Settling);
    }

    #[tokio::test(start_paused = true)]
    async fn test_main_shard_installed_after_settle() {
        let membership = StaticMembership::new(3, three_members());
        let mut harness = Harness::start(&membership, cluster("a", 3, 3, 2)).await;

        sleep_secs(34).await;
        assert_eq!(harness.phase(), ShardPhase::Settling);
        assert!(harness.owned().await.is_empty());

        sleep_secs(2).await;
        assert_eq!(harness.phase(), ShardPhase::Steady);
        assert!(harness.status.borrow().is_ready());
        assert_eq!(harness.owned().await, vec!["dev3", "dev6"]);
        assert_eq!(harness.update_rx.drain(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_warmup_waits_for_initializing_shards() {
        let membership = StaticMembership::new(3, vec![Member::sharded(0, "a")]);
        let harness = Harness::start(&membership, cluster("a", 3, 2, 1)).await;

        sleep_secs(15).await;
        assert_eq!(harness.phase(), ShardPhase::WarmingUp);

        // Seen by the check at t=20, main shard follows 35s later.
        membership.upsert(Member::sharded(1, "b")).await;
        sleep_secs(39).await;
        assert_eq!(harness.phase(), ShardPhase::Settling);
        sleep_secs(2).await;
        assert_eq!(harness.phase(), ShardPhase::Steady);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_member_triggers_takeover() {
        let membership = StaticMembership::new(3, three_members());
        let harness = Harness::start(&membership, cluster("a", 3, 3, 2)).await;

        sleep_secs(40).await;
        membership.set_status("2", "critical").await;

        // Acted on at the first tick (t=65), not before.
        sleep_secs(20).await;
        assert_eq!(harness.owned().await, vec!["dev3", "dev6"]);

        sleep_secs(6).await;
        assert_eq!(harness.phase(), ShardPhase::TakenOver);
        assert_eq!(harness.status.borrow().failed_slots, vec![2]);
        assert_eq!(harness.owned().await, vec!["dev2", "dev3", "dev6"]);
        assert_eq!(
            harness.status.borrow().filters,
            vec![EXTRA_SHARD.to_string(), MAIN_SHARD.to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_takeover_without_notification() {
        let membership = StaticMembership::new(3, vec![
            Member::sharded(0, "a"),
            Member::sharded(1, "b"),
        ]);
        let harness = Harness::start(&membership, cluster("a", 3, 2, 2)).await;

        // Main at t=35, delayed takeover at t=70.
        sleep_secs(69).await;
        assert_eq!(harness.phase(), ShardPhase::Steady);
        assert_eq!(harness.owned().await, vec!["dev3", "dev6"]);

        sleep_secs(2).await;
        assert_eq!(harness.phase(), ShardPhase::TakenOver);
        assert_eq!(harness.owned().await, vec!["dev2", "dev3", "dev6"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_and_unsuspend() {
        let membership = StaticMembership::new(3, three_members());
        let harness = Harness::start(&membership, cluster("a", 3, 3, 2)).await;

        sleep_secs(40).await;
        membership.set_status("1", "critical").await;
        membership.set_status("2", "critical").await;

        sleep_secs(26).await;
        assert_eq!(harness.phase(), ShardPhase::Suspended);
        assert!(harness.owned().await.is_empty());
        assert!(harness.status.borrow().filters.is_empty());

        // Delayed takeover at t=70 must not resurrect ownership.
        sleep_secs(10).await;
        assert!(harness.owned().await.is_empty());

        membership.set_status("1", "passing").await;
        sleep_secs(20).await;
        assert_eq!(harness.phase(), ShardPhase::TakenOver);
        assert_eq!(harness.owned().await, vec!["dev2", "dev3", "dev6"]);

        membership.set_status("2", "passing").await;
        sleep_secs(30).await;
        assert_eq!(harness.phase(), ShardPhase::Steady);
        assert_eq!(harness.owned().await, vec!["dev3", "dev6"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_delayed_takeover_cannot_undo_suspend() {
        let membership = StaticMembership::new(3, three_members());
        let discovery = Arc::new(LaggingDiscovery {
            inner: membership.discovery_for("a"),
            lag_secs: AtomicU64::new(0),
        });
        let harness = Harness::start_with(discovery.clone(), cluster("a", 3, 3, 2)).await;

        sleep_secs(40).await;
        membership.set_status("2", "critical").await;
        sleep_secs(26).await;
        assert_eq!(harness.phase(), ShardPhase::TakenOver);

        // The delayed check reads membership at t=70 and gets it back at t=100.
        discovery.lag_secs.store(30, Ordering::Release);
        sleep_secs(14).await;
        membership.set_status("1", "critical").await;

        // The t=95 tick waits for it, then suspends on a fresh snapshot.
        sleep_secs(21).await;
        assert_eq!(harness.phase(), ShardPhase::Suspended);
        assert!(harness.owned().await.is_empty());

        sleep_secs(100).await;
        assert_eq!(harness.phase(), ShardPhase::Suspended);
        assert!(harness.owned().await.is_empty());
        assert!(harness.status.borrow().filters.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_outage_keeps_filters() {
        let membership = StaticMembership::new(3, three_members());
        let harness = Harness::start(&membership, cluster("a", 3, 3, 2)).await;

        sleep_secs(40).await;
        membership.set_status("2", "critical").await;
        membership.set_unavailable(true);

        sleep_secs(26).await;
        assert!(!harness.status.borrow().discovery_ok);
        assert_eq!(harness.owned().await, vec!["dev3", "dev6"]);

        // Delayed takeover at t=70 fails the same way.
        sleep_secs(10).await;
        assert_eq!(harness.owned().await, vec!["dev3", "dev6"]);

        // The change is still pending and is applied at the t=95 tick.
        membership.set_unavailable(false);
        sleep_secs(20).await;
        assert!(harness.status.borrow().discovery_ok);
        assert_eq!(harness.owned().await, vec!["dev2", "dev3", "dev6"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_filters() {
        let membership = StaticMembership::new(1, vec![Member::sharded(0, "a")]);
        let harness = Harness::start(&membership, cluster("a", 1, 1, 1)).await;

        sleep_secs(36).await;
        assert_eq!(harness.owned().await.len(), 6);

        harness.shutdown_tx.send(true).unwrap();
        harness.handle.await.unwrap().unwrap();
        assert!(harness.registry.filter_names().await.is_empty());
        assert_eq!(harness.status.borrow().phase, ShardPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_settle() {
        let membership = StaticMembership::new(1, vec![Member::sharded(0, "a")]);
        let harness = Harness::start(&membership, cluster("a", 1, 1, 1)).await;

        sleep_secs(10).await;
        harness.shutdown_tx.send(true).unwrap();
        harness.handle.await.unwrap().unwrap();
        assert!(harness.registry.filter_names().await.is_empty());
    }
}

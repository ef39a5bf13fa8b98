//! Etcd Membership
//!
//! Members live under `/telefleet/v1/clusters/{cluster_id}/members/{id}` as
//! JSON records attached to a lease. The lease is refreshed by a keep-alive
//! task; when it stops (crash, partition) the record expires and every peer
//! sees the slot as failed.

use super::{Discovery, DiscoveryError};
use crate::config::FleetConfig;
use crate::observability::metrics;
use crate::signal::SignalSender;
use anyhow::{anyhow, Result};
use backoff::{future::retry, ExponentialBackoff};
use etcd_client::{
    Client, Compare, CompareOp, GetOptions, LeaseKeepAliveStream, LeaseKeeper, PutOptions, Txn,
    TxnOp, WatchOptions,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use telefleet_core::{Member, MemberStatus, SHARDS_ENABLED};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Member record stored in etcd. The id is the last key segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub address: String,
    pub status: MemberStatus,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl MemberRecord {
    /// Record for a live node taking part in sharding.
    pub fn passing(address: &str) -> Self {
        let mut meta = HashMap::new();
        meta.insert(SHARDS_ENABLED.to_string(), "true".to_string());
        Self {
            address: address.to_string(),
            status: MemberStatus::Passing,
            meta,
        }
    }

    pub fn into_member(self, id: String) -> Member {
        Member {
            id,
            address: self.address,
            status: self.status,
            meta: self.meta,
        }
    }
}

pub fn members_prefix(cluster_id: &str) -> String {
    format!("/telefleet/v1/clusters/{}/members/", cluster_id)
}

pub fn member_key(cluster_id: &str, id: usize) -> String {
    format!("{}{}", members_prefix(cluster_id), id)
}

/// Decode one key/value pair read under `prefix`.
pub fn decode_member(prefix: &str, key: &[u8], value: &[u8]) -> Result<Member, DiscoveryError> {
    let key = String::from_utf8_lossy(key);
    let record: MemberRecord =
        serde_json::from_slice(value).map_err(|source| DiscoveryError::InvalidRecord {
            key: key.to_string(),
            source,
        })?;
    let id = key.strip_prefix(prefix).unwrap_or(key.as_ref()).to_string();
    Ok(record.into_member(id))
}

struct Session {
    member: Member,
    lease_id: i64,
    keepalive: JoinHandle<()>,
}

/// Etcd-backed discovery for one local node.
pub struct EtcdDiscovery {
    client: Client,
    cluster_id: String,
    address: String,
    number_of_nodes: usize,
    lease_ttl: i64,
    keepalive_interval: Duration,
    request_timeout: Duration,
    reconnect_delay: Duration,
    session: Mutex<Option<Session>>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl EtcdDiscovery {
    /// Connect to etcd with exponential backoff
    pub async fn connect(config: &FleetConfig) -> Result<Self> {
        let discovery = &config.discovery;
        let backoff = ExponentialBackoff {
            initial_interval: discovery.etcd_backoff_initial,
            max_interval: discovery.etcd_backoff_max,
            max_elapsed_time: Some(discovery.etcd_backoff_max_elapsed),
            multiplier: discovery.etcd_backoff_multiplier,
            ..Default::default()
        };

        let endpoints = discovery.etcd_endpoints.clone();
        let client = retry(backoff, || async {
            match Client::connect(&endpoints, None).await {
                Ok(client) => {
                    debug!(endpoints = ?endpoints, "Connected to etcd");
                    Ok(client)
                }
                Err(e) => {
                    warn!(error = %e, "etcd connection failed, retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
        .map_err(|e| anyhow!("Failed to connect to etcd after retries: {:?}", e))?;

        Ok(Self {
            client,
            cluster_id: config.cluster.cluster_id.clone(),
            address: config.cluster.node_address.clone(),
            number_of_nodes: config.cluster.number_of_nodes,
            lease_ttl: discovery.lease_ttl,
            keepalive_interval: discovery.keepalive_interval,
            request_timeout: discovery.request_timeout,
            reconnect_delay: discovery.reconnect_delay,
            session: Mutex::new(None),
            watch_task: Mutex::new(None),
        })
    }

    fn prefix(&self) -> String {
        members_prefix(&self.cluster_id)
    }

    /// Run one etcd request under the configured timeout.
    async fn bounded<T>(
        &self,
        request: impl Future<Output = Result<T, etcd_client::Error>>,
    ) -> Result<T, DiscoveryError> {
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DiscoveryError::Timeout),
        }
    }

    /// Claim the lowest id in `[0, number_of_nodes)` nobody holds yet.
    ///
    /// Each candidate is claimed with a create-if-absent transaction so two
    /// nodes racing for the same id cannot both win.
    async fn claim_free_id(
        &self,
        existing: &[Member],
        value: &str,
        lease_id: i64,
    ) -> Result<Option<usize>, DiscoveryError> {
        let mut client = self.client.clone();
        for id in 0..self.number_of_nodes {
            if existing.iter().any(|m| m.slot() == Some(id)) {
                continue;
            }

            let key = member_key(&self.cluster_id, id);
            let txn = Txn::new()
                .when(vec![Compare::create_revision(key.clone(), CompareOp::Equal, 0)])
                .and_then(vec![TxnOp::put(
                    key.clone(),
                    value,
                    Some(PutOptions::new().with_lease(lease_id)),
                )]);

            if self.bounded(client.txn(txn)).await?.succeeded() {
                return Ok(Some(id));
            }
            debug!(key = %key, "Member id claimed concurrently, trying next");
        }
        Ok(None)
    }
}

impl Discovery for EtcdDiscovery {
    async fn register(&self) -> Result<Member, DiscoveryError> {
        let mut session = self.session.lock().await;
        if let Some(active) = session.as_ref() {
            return Ok(active.member.clone());
        }

        let mut client = self.client.clone();
        let lease_id = self
            .bounded(client.lease_grant(self.lease_ttl, None))
            .await?
            .id();
        debug!(lease_id = lease_id, ttl = self.lease_ttl, "Lease granted");

        let record = MemberRecord::passing(&self.address);
        let value = serde_json::to_string(&record)?;
        let existing = self.instances().await?;

        // A restart inside the lease TTL finds its own record still present.
        let previous = existing
            .iter()
            .find(|m| m.address == self.address)
            .and_then(|m| m.slot())
            .filter(|id| *id < self.number_of_nodes);

        let claimed = match previous {
            Some(id) => {
                let key = member_key(&self.cluster_id, id);
                let options = PutOptions::new().with_lease(lease_id);
                self.bounded(client.put(key, value.as_str(), Some(options)))
                    .await?;
                Some(id)
            }
            None => self.claim_free_id(&existing, &value, lease_id).await?,
        };

        let Some(id) = claimed else {
            if let Err(e) = client.lease_revoke(lease_id).await {
                warn!(lease_id = lease_id, error = %e, "Failed to revoke unused lease");
            }
            return Err(DiscoveryError::NoFreeSlot(self.number_of_nodes));
        };

        let (keeper, stream) = self.bounded(client.lease_keep_alive(lease_id)).await?;
        let keepalive = spawn_keepalive_task(keeper, stream, lease_id, self.keepalive_interval);

        let member = record.into_member(id.to_string());
        info!(
            key = %member_key(&self.cluster_id, id),
            readopted = previous.is_some(),
            "Member registered in etcd"
        );
        *session = Some(Session {
            member: member.clone(),
            lease_id,
            keepalive,
        });
        Ok(member)
    }

    async fn instances(&self) -> Result<Vec<Member>, DiscoveryError> {
        let prefix = self.prefix();
        let mut client = self.client.clone();
        let resp = self
            .bounded(client.get(prefix.as_str(), Some(GetOptions::new().with_prefix())))
            .await?;

        let mut members = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            match decode_member(&prefix, kv.key(), kv.value()) {
                Ok(member) => members.push(member),
                Err(e) => warn!(error = %e, "Skipping member record"),
            }
        }
        Ok(members)
    }

    async fn watch(&self, notifier: SignalSender) -> Result<(), DiscoveryError> {
        let handle = tokio::spawn(watch_members(
            self.client.clone(),
            self.prefix(),
            notifier,
            self.reconnect_delay,
        ));
        if let Some(previous) = self.watch_task.lock().await.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn deregister(&self) -> Result<(), DiscoveryError> {
        if let Some(handle) = self.watch_task.lock().await.take() {
            handle.abort();
        }

        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };
        session.keepalive.abort();

        let mut client = self.client.clone();
        self.bounded(client.lease_revoke(session.lease_id)).await?;
        info!(id = %session.member.id, "Member deregistered from etcd");
        Ok(())
    }
}

/// Spawn background task to send periodic keep-alive requests for the lease.
///
/// When keep-alive fails the task exits and the record expires with the
/// lease, so peers treat this node's slot as failed.
fn spawn_keepalive_task(
    mut keeper: LeaseKeeper,
    mut keeper_stream: LeaseKeepAliveStream,
    lease_id: i64,
    keepalive_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(keepalive_interval);
        interval.tick().await; // Skip first immediate tick

        loop {
            interval.tick().await;

            if let Err(e) = keeper.keep_alive().await {
                metrics::record_discovery_error("keepalive");
                error!(lease_id = lease_id, error = %e, "Keep-alive send failed, node will expire");
                break;
            }

            match keeper_stream.message().await {
                Ok(Some(resp)) => {
                    trace!(lease_id = lease_id, ttl = resp.ttl(), "Keep-alive OK");
                }
                Ok(None) => {
                    metrics::record_discovery_error("keepalive");
                    error!(lease_id = lease_id, "Keep-alive stream closed, node will expire");
                    break;
                }
                Err(e) => {
                    metrics::record_discovery_error("keepalive");
                    error!(lease_id = lease_id, error = %e, "Keep-alive failed, node will expire");
                    break;
                }
            }
        }
    })
}

/// Signal on every change under `prefix`, re-opening the watch after errors.
async fn watch_members(
    mut client: Client,
    prefix: String,
    notifier: SignalSender,
    reconnect_delay: Duration,
) {
    while !notifier.is_closed() {
        match client
            .watch(prefix.as_str(), Some(WatchOptions::new().with_prefix()))
            .await
        {
            Ok((mut watcher, mut stream)) => {
                debug!(prefix = %prefix, "Membership watch established");
                // Changes made while the stream was down are not replayed.
                notifier.notify();

                loop {
                    match stream.message().await {
                        Ok(Some(resp)) => {
                            if resp.canceled() {
                                warn!("Membership watch canceled, reconnecting");
                                break;
                            }
                            if !resp.events().is_empty() {
                                trace!(events = resp.events().len(), "Membership changed");
                                notifier.notify();
                            }
                        }
                        Ok(None) => {
                            warn!("Membership watch stream ended, reconnecting");
                            break;
                        }
                        Err(e) => {
                            metrics::record_discovery_error("watch");
                            warn!(error = %e, "Membership watch failed, reconnecting");
                            break;
                        }
                    }
                }

                let _ = watcher.cancel().await;
            }
            Err(e) => {
                metrics::record_discovery_error("watch");
                warn!(error = %e, "Failed to open membership watch");
            }
        }

        tokio::time::sleep(reconnect_delay).await;
    }
    debug!("Membership watch stopped");
}

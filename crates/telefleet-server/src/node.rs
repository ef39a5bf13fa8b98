//! Node Runtime
//!
//! Wires one process together: discovery registration and watch, the shard
//! coordinator, the subscription tracker and the admin API. Everything stops
//! on the shared shutdown signal.

use crate::api::{self, AppState};
use crate::collector::SubscriptionTracker;
use crate::config::FleetConfig;
use crate::discovery::Discovery;
use crate::filter::FilterRegistry;
use crate::observability::MetricsState;
use crate::sharding::ShardCoordinator;
use crate::signal;
use anyhow::{Context, Result};
use std::sync::Arc;
use telefleet_core::{main_shard, Device};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

/// Pending refresh requests kept for the tracker.
pub const UPDATE_REQUEST_CAPACITY: usize = 1;

/// Pending membership change notifications kept for the coordinator.
pub const MEMBERSHIP_CHANGE_CAPACITY: usize = 1;

/// Run a node until `shutdown` turns true or registration fails.
pub async fn run_node<D: Discovery>(
    config: FleetConfig,
    discovery: Arc<D>,
    metrics_state: Option<MetricsState>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let registry = Arc::new(FilterRegistry::new(config.devices.clone()));
    let (update_tx, update_rx) = signal::channel("update_request", UPDATE_REQUEST_CAPACITY);
    let (change_tx, change_rx) =
        signal::channel("membership_change", MEMBERSHIP_CHANGE_CAPACITY);

    let member = discovery
        .register()
        .await
        .context("Failed to register in membership")?;
    info!(id = %member.id, address = %member.address, "Registration submitted");

    discovery
        .watch(change_tx)
        .await
        .context("Failed to start membership watch")?;

    let tracker = SubscriptionTracker::new(registry.clone(), update_rx);
    let active = tracker.active();
    let tracker_task = tokio::spawn(tracker.run(shutdown.clone()));

    let coordinator = ShardCoordinator::new(
        discovery.clone(),
        registry.clone(),
        update_tx,
        change_rx,
        config.cluster.clone(),
        config.timers.clone(),
    );

    let api_task = if config.api.enabled {
        let state = AppState {
            status: coordinator.subscribe(),
            registry: registry.clone(),
            active,
            metrics_state,
        };
        let listener = TcpListener::bind(&config.api.bind_addr)
            .await
            .with_context(|| format!("Failed to bind admin API on {}", config.api.bind_addr))?;
        info!(bind_addr = %config.api.bind_addr, "Admin API listening");

        let mut api_shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            axum::serve(listener, api::create_router(state))
                .with_graceful_shutdown(async move {
                    signal::wait_for_shutdown(&mut api_shutdown).await;
                })
                .await
        }))
    } else {
        None
    };

    let result = coordinator.run(shutdown).await;

    if let Err(e) = discovery.deregister().await {
        warn!(error = %e, "Deregistration failed, membership record will expire");
    }

    // The tracker exits once the coordinator drops its refresh sender.
    if let Err(e) = tracker_task.await {
        warn!(error = %e, "Subscription tracker task failed");
    }

    if let Some(api_task) = api_task {
        if result.is_err() {
            api_task.abort();
        }
        match api_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Admin API server failed"),
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!(error = %e, "Admin API task failed"),
        }
    }

    result.context("Shard coordinator failed")?;
    info!("Node stopped");
    Ok(())
}

/// Main-shard split of `devices` over `number_of_nodes` healthy members.
pub fn shard_plan(devices: &[Device], number_of_nodes: usize) -> Vec<Vec<&Device>> {
    (0..number_of_nodes)
        .map(|id| {
            let owns = main_shard(id, number_of_nodes);
            devices.iter().filter(|device| owns(*device)).collect()
        })
        .collect()
}

//! Prometheus Metrics
//!
//! Defines and initializes all Prometheus metrics for a telefleet node.
//!
//! Metrics tracked:
//! - `telefleet_shard_owned_devices` - gauge of devices this node currently collects
//! - `telefleet_shard_suspended` - gauge, 1 while collection is suspended
//! - `telefleet_shard_healthy_members` - gauge of healthy sharded members
//! - `telefleet_shard_failed_slots` - gauge of slots with no passing member
//! - `telefleet_shard_rebalances_total` - counter of rebalance passes by outcome
//! - `telefleet_shard_takeovers_total` - counter of takeover installs by source
//! - `telefleet_discovery_errors_total` - counter of failed discovery calls by operation
//! - `telefleet_refresh_dropped_total` - counter of coalesced (dropped) signals

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// State containing the Prometheus handle for metrics export
#[derive(Clone)]
pub struct MetricsState {
    pub prometheus_handle: PrometheusHandle,
}

/// Initialize Prometheus metrics and return the handle for exporting.
pub fn init_metrics() -> Result<MetricsState, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_metric_descriptions();

    Ok(MetricsState {
        prometheus_handle: handle,
    })
}

fn register_metric_descriptions() {
    // Shard metrics
    describe_gauge!(
        "telefleet_shard_owned_devices",
        "Number of devices this node is collecting"
    );
    describe_gauge!(
        "telefleet_shard_suspended",
        "1 while collection is suspended below minimum_shards"
    );
    describe_gauge!(
        "telefleet_shard_healthy_members",
        "Number of passing members carrying the shard marker"
    );
    describe_gauge!(
        "telefleet_shard_failed_slots",
        "Number of shard slots with no passing member"
    );
    describe_counter!(
        "telefleet_shard_rebalances_total",
        "Total number of rebalance passes"
    );
    describe_counter!(
        "telefleet_shard_takeovers_total",
        "Total number of takeover filter installs"
    );

    // Discovery metrics
    describe_counter!(
        "telefleet_discovery_errors_total",
        "Total number of failed discovery calls"
    );
    describe_counter!(
        "telefleet_refresh_dropped_total",
        "Total number of signals dropped because one was already pending"
    );
}

/// Update the owned devices gauge
pub fn set_owned_devices(count: usize) {
    gauge!("telefleet_shard_owned_devices").set(count as f64);
}

pub fn set_suspended(suspended: bool) {
    gauge!("telefleet_shard_suspended").set(if suspended { 1.0 } else { 0.0 });
}

/// Update the membership gauges from one discovery snapshot
pub fn set_membership(healthy: usize, failed_slots: usize) {
    gauge!("telefleet_shard_healthy_members").set(healthy as f64);
    gauge!("telefleet_shard_failed_slots").set(failed_slots as f64);
}

/// Record a rebalance pass, `outcome` is `ok` or `error`
pub fn record_rebalance(outcome: &'static str) {
    counter!("telefleet_shard_rebalances_total", "outcome" => outcome).increment(1);
}

/// Record a takeover install, `source` is `delayed` or `steady`
pub fn record_takeover(source: &'static str) {
    counter!("telefleet_shard_takeovers_total", "source" => source).increment(1);
}

pub fn record_discovery_error(operation: &'static str) {
    counter!("telefleet_discovery_errors_total", "operation" => operation).increment(1);
}

pub fn record_signal_dropped(signal: &'static str) {
    counter!("telefleet_refresh_dropped_total", "signal" => signal).increment(1);
}

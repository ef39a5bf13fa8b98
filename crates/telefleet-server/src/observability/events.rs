//! Structured Events
//!
//! Structured event logging with consistent fields across the node. Each
//! event type has a dedicated function so field names never drift.
//!
//! Event types:
//! - `registered` - Local registration observed in discovery
//! - `warmup_progress` - Healthy member count while waiting to start
//! - `main_shard_installed` - Home-slot filter installed
//! - `takeover_installed` - Reduced-modulus takeover filter installed
//! - `suspended` - Collection paused below the minimum member count
//! - `unsuspended` - Collection resumed
//! - `device_subscribed` - Device entered this node's collection set
//! - `device_unsubscribed` - Device left this node's collection set

use tracing::{info, warn};

/// Emit a registration event
pub fn registered(node_address: &str, shard_id: usize, attempts: u32) {
    info!(
        event_type = "registered",
        node_address = %node_address,
        shard_id = shard_id,
        attempts = attempts,
        "Registered in membership"
    );
}

/// Emit a warm-up progress event
pub fn warmup_progress(healthy: usize, required: usize) {
    info!(
        event_type = "warmup_progress",
        healthy = healthy,
        required = required,
        "Waiting for cluster members"
    );
}

/// Emit a main shard installed event
pub fn main_shard_installed(shard_id: usize, number_of_nodes: usize) {
    info!(
        event_type = "main_shard_installed",
        shard_id = shard_id,
        number_of_nodes = number_of_nodes,
        "Main shard installed"
    );
}

/// Emit a takeover installed event
pub fn takeover_installed(shard_id: usize, failed_slots: &[usize], survivors: usize, source: &str) {
    info!(
        event_type = "takeover_installed",
        shard_id = shard_id,
        failed_slots = ?failed_slots,
        survivors = survivors,
        source = %source,
        "Takeover shard installed"
    );
}

/// Emit a suspended event
pub fn suspended(healthy: usize, minimum: usize) {
    warn!(
        event_type = "suspended",
        healthy = healthy,
        minimum = minimum,
        "Collection suspended, too few healthy members"
    );
}

/// Emit an unsuspended event
pub fn unsuspended(healthy: usize, minimum: usize) {
    info!(
        event_type = "unsuspended",
        healthy = healthy,
        minimum = minimum,
        "Collection resumed"
    );
}

pub fn device_subscribed(host: &str) {
    info!(event_type = "device_subscribed", host = %host, "Subscribed to device");
}

pub fn device_unsubscribed(host: &str) {
    info!(event_type = "device_unsubscribed", host = %host, "Unsubscribed from device");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// JSON lines logged while `emit` runs.
    fn capture(emit: impl FnOnce()) -> Vec<Value> {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, emit);

        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_events_carry_event_type() {
        let lines = capture(|| {
            registered("10.0.0.1:8080", 0, 1);
            takeover_installed(0, &[2], 2, "steady");
            suspended(1, 2);
            device_unsubscribed("core1.lax");
        });

        assert_eq!(lines.len(), 4);
        let fields: Vec<&Value> = lines.iter().map(|line| &line["fields"]).collect();
        assert_eq!(fields[0]["event_type"], "registered");
        assert_eq!(fields[0]["node_address"], "10.0.0.1:8080");
        assert_eq!(fields[1]["event_type"], "takeover_installed");
        assert_eq!(fields[1]["source"], "steady");
        assert_eq!(fields[1]["survivors"], 2);
        assert_eq!(fields[2]["event_type"], "suspended");
        assert_eq!(lines[2]["level"], "WARN");
        assert_eq!(fields[3]["host"], "core1.lax");
    }
}

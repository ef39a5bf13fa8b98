//! Device Filter Registry
//!
//! Holds the configured device list and a named set of ownership
//! predicates over it. A device is selected when at least one installed
//! predicate claims it, so a node with nothing installed collects nothing.
//! The coordinator installs and removes predicates, the collector reads the
//! filtered list.

use std::collections::BTreeMap;
use telefleet_core::{Device, DevicePredicate};
use tokio::sync::RwLock;
use tracing::debug;

/// Named predicates over a read-only device list.
pub struct FilterRegistry {
    devices: Vec<Device>,
    filters: RwLock<BTreeMap<String, DevicePredicate>>,
}

impl FilterRegistry {
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices,
            filters: RwLock::new(BTreeMap::new()),
        }
    }

    /// Install a predicate, replacing any predicate with the same name.
    pub async fn add_filter(&self, name: impl Into<String>, predicate: DevicePredicate) {
        let name = name.into();
        let replaced = self
            .filters
            .write()
            .await
            .insert(name.clone(), predicate)
            .is_some();
        debug!(filter = %name, replaced = replaced, "Filter installed");
    }

    /// Remove a predicate. Returns whether it was installed.
    pub async fn remove_filter(&self, name: &str) -> bool {
        let removed = self.filters.write().await.remove(name).is_some();
        if removed {
            debug!(filter = %name, "Filter removed");
        }
        removed
    }

    /// Devices claimed by any installed predicate, in configuration order.
    ///
    /// Empty while no predicate is installed.
    pub async fn devices(&self) -> Vec<Device> {
        let filters = self.filters.read().await;
        self.devices
            .iter()
            .filter(|device| filters.values().any(|predicate| predicate(*device)))
            .cloned()
            .collect()
    }

    /// Names of the installed predicates, sorted.
    pub async fn filter_names(&self) -> Vec<String> {
        self.filters.read().await.keys().cloned().collect()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn registry() -> FilterRegistry {
        FilterRegistry::new(
            ["core1.lax", "core1.bur", "core2.bur", "core1.cdg"]
                .into_iter()
                .map(Device::new)
                .collect(),
        )
    }

    fn host_contains(needle: &'static str) -> DevicePredicate {
        Arc::new(move |device: &Device| device.host.contains(needle))
    }

    #[tokio::test]
    async fn test_no_filters_selects_nothing() {
        let registry = registry();
        assert!(registry.devices().await.is_empty());
        assert!(registry.filter_names().await.is_empty());
        assert_eq!(registry.device_count(), 4);
    }

    #[tokio::test]
    async fn test_filters_are_unioned() {
        let registry = registry();
        registry.add_filter("bur", host_contains("bur")).await;
        registry.add_filter("lax", host_contains("lax")).await;

        let hosts: Vec<String> = registry.devices().await.into_iter().map(|d| d.host).collect();
        assert_eq!(hosts, vec!["core1.lax", "core1.bur", "core2.bur"]);
        assert_eq!(registry.filter_names().await, vec!["bur", "lax"]);
    }

    #[tokio::test]
    async fn test_add_replaces_same_name() {
        let registry = registry();
        registry.add_filter("site", host_contains("lax")).await;
        registry.add_filter("site", host_contains("cdg")).await;

        let hosts: Vec<String> = registry.devices().await.into_iter().map(|d| d.host).collect();
        assert_eq!(hosts, vec!["core1.cdg"]);
    }

    #[tokio::test]
    async fn test_remove_filter() {
        let registry = registry();
        registry.add_filter("all", Arc::new(|_: &Device| true)).await;
        assert_eq!(registry.devices().await.len(), registry.device_count());

        assert!(registry.remove_filter("all").await);
        assert!(!registry.remove_filter("all").await);
        assert!(registry.devices().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_readers_and_writers() {
        let registry = Arc::new(registry());
        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let name = format!("f{}", i % 4);
                registry.add_filter(name.clone(), host_contains("core")).await;
                let _ = registry.devices().await;
                registry.remove_filter(&name).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(registry.filter_names().await.is_empty());
        assert!(registry.devices().await.is_empty());
    }
}

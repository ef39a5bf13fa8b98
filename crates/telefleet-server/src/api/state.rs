//! Application State
//!
//! Shared state passed to all API handlers.

use crate::collector::ActiveDevices;
use crate::filter::FilterRegistry;
use crate::observability::MetricsState;
use crate::sharding::ShardStatus;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub status: watch::Receiver<ShardStatus>,
    pub registry: Arc<FilterRegistry>,
    pub active: ActiveDevices,
    pub metrics_state: Option<MetricsState>,
}

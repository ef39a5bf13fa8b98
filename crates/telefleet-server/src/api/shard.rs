//! Shard Endpoints
//!
//! Exposes coordinator state at GET /shard and the collected devices at
//! GET /devices

use super::AppState;
use crate::sharding::ShardStatus;
use axum::{extract::State, Json};
use serde::Serialize;
use telefleet_core::Device;

/// Response for GET /devices
#[derive(Debug, Serialize)]
pub struct DevicesResponse {
    /// Devices this node currently collects
    pub count: usize,
    /// Devices in the configuration
    pub total: usize,
    pub devices: Vec<Device>,
}

/// GET /shard - Current coordinator status
#[tracing::instrument(skip(state))]
pub async fn get_shard(State(state): State<AppState>) -> Json<ShardStatus> {
    let status = state.status.borrow().clone();
    Json(status)
}

/// GET /devices - Devices owned by this node
#[tracing::instrument(skip(state))]
pub async fn get_devices(State(state): State<AppState>) -> Json<DevicesResponse> {
    let devices = state.active.snapshot().await;
    Json(DevicesResponse {
        count: devices.len(),
        total: state.registry.device_count(),
        devices,
    })
}

//! HTTP API Module
//!
//! Admin endpoints for a telefleet node.
//!
//! This module contains:
//! - `state`: Shared application state
//! - `health`: Liveness and readiness probes
//! - `metrics`: Prometheus metrics endpoint
//! - `shard`: Coordinator status and owned devices

mod health;
mod metrics;
mod shard;
mod state;

pub use state::AppState;

use axum::{routing::get, Router};

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health checks
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Observability
        .route("/metrics", get(metrics::get_metrics))
        // Shard state
        .route("/shard", get(shard::get_shard))
        .route("/devices", get(shard::get_devices))
        .with_state(state)
}

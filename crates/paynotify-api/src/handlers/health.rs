//! Health check handlers for service monitoring.
//!
//! `/health` reports delivery engine activity and turns unhealthy once no
//! delivery worker is running; `/live` only proves the process answers.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use paynotify_delivery::EngineStats;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::AppState;

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service health status
    pub status: HealthStatus,
    /// Timestamp when health check was performed
    pub timestamp: DateTime<Utc>,
    /// Delivery engine counters
    pub delivery: EngineStats,
    /// Service version information
    pub version: String,
}

/// Overall health status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Delivery workers are running
    Healthy,
    /// No delivery worker is running
    Unhealthy,
}

impl HealthResponse {
    /// Builds a health report from an engine snapshot.
    pub fn from_stats(delivery: EngineStats) -> Self {
        let status = if delivery.active_workers > 0 {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        Self {
            status,
            timestamp: Utc::now(),
            delivery,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Health check endpoint handler.
///
/// Cheap enough to be polled by load balancers: it only reads counters.
#[instrument(name = "health_check", skip(app_state))]
pub async fn health_check(State(app_state): State<AppState>) -> Response {
    let response = HealthResponse::from_stats(app_state.delivery.stats());

    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    debug!(
        status = ?response.status,
        active_workers = response.delivery.active_workers,
        queued = response.delivery.queued,
        "Health check completed"
    );

    (status_code, Json(response)).into_response()
}

/// Liveness check endpoint.
///
/// Does not look at the delivery engine.
#[instrument(name = "liveness_check")]
pub async fn liveness_check() -> Response {
    debug!("Performing liveness check");

    let response = serde_json::json!({
        "status": "alive",
        "timestamp": Utc::now(),
        "service": "paynotify-api"
    });

    (StatusCode::OK, Json(response)).into_response()
}

//! Health check handlers

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::audit::StoreHealthSnapshot;
use crate::state::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service name
    pub service: String,

    /// Version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    /// Overall readiness status
    pub ready: bool,

    /// Service name
    pub service: String,

    /// Audit store status
    pub store: StoreStatus,
}

/// Audit store status reported by `/ready`
#[derive(Debug, Serialize)]
pub struct StoreStatus {
    /// Backend name
    pub backend: &'static str,

    /// Store answered a ping
    pub reachable: bool,

    /// Ping failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Malformed records skipped by queries
    pub skipped_records: u64,

    /// Failure counters since startup
    pub health: StoreHealthSnapshot,
}

/// Simple health check (liveness probe)
///
/// Always returns 200 OK if the service is running.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        service: state.config().service.name.clone(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    };

    (StatusCode::OK, Json(response))
}

/// Readiness check (readiness probe)
///
/// Returns 503 Service Unavailable when the audit store does not answer a
/// ping. Past failures alone do not make the service unready: the gate
/// fails open, so traffic can still be served.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.store();
    let timeout = state.config().throttle.store_timeout();

    let ping = match tokio::time::timeout(timeout, store.ping()).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err(format!("ping timed out after {} ms", timeout.as_millis())),
    };
    if let Err(message) = &ping {
        tracing::error!("Audit store readiness check failed: {}", message);
    }

    let reachable = ping.is_ok();
    let response = ReadinessResponse {
        ready: reachable,
        service: state.config().service.name.clone(),
        store: StoreStatus {
            backend: store.backend(),
            reachable,
            message: ping.err(),
            skipped_records: store.skipped_records(),
            health: state.health().snapshot(),
        },
    };

    let status = if reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

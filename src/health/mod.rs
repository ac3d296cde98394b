//! Liveness (`/health`), readiness (`/health/ready`) and version (`/health/version`) endpoints.

use crate::store::EntityStore;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Down,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HealthInfo {
    pub status: HealthStatus,
    pub version: String,
    pub backend: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone)]
pub struct HealthState {
    pub store: Arc<dyn EntityStore>,
    pub start_time: SystemTime,
}

impl HealthState {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            store,
            start_time: SystemTime::now(),
        }
    }

    pub fn uptime(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.start_time)
            .unwrap_or(Duration::from_secs(0))
            .as_secs()
    }

    async fn probe(&self) -> HealthInfo {
        let (status, message) = match self.store.ping().await {
            Ok(()) => (HealthStatus::Up, None),
            Err(e) => {
                error!(error = %e, backend = self.store.backend(), "Store health check failed");
                (HealthStatus::Down, Some(e.response_message()))
            }
        };
        HealthInfo {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            backend: self.store.backend().to_string(),
            timestamp: Utc::now(),
            uptime_seconds: self.uptime(),
            message,
        }
    }
}

pub async fn health_check(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    debug!("Health check endpoint called");
    Json(json!({
        "status": HealthStatus::Up,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.uptime(),
    }))
}

/// 503 while the store cannot be reached.
pub async fn readiness_check(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let info = state.probe().await;
    let status_code = match info.status {
        HealthStatus::Up => StatusCode::OK,
        HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(info))
}

pub async fn version_info() -> impl IntoResponse {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub fn health_routes(store: Arc<dyn EntityStore>) -> Router {
    let state = Arc::new(HealthState::new(store));
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
        .route("/health/version", get(version_info))
        .with_state(state)
}

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use kindred_shared::{HealthCheck, HealthResponse, HealthStatus};
use std::sync::Arc;

use crate::AppState;

/// Probes the database and the event bus.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let database = match state.profiles.ping().await {
        Ok(()) => HealthCheck {
            name: "database".into(),
            status: HealthStatus::Healthy,
            message: None,
        },
        Err(e) => HealthCheck {
            name: "database".into(),
            status: HealthStatus::Unhealthy,
            message: Some(e.to_string()),
        },
    };

    // Publishing is best effort; a closed channel only degrades.
    let events = if state.lifecycle.events().is_connected() {
        HealthCheck {
            name: "rabbitmq".into(),
            status: HealthStatus::Healthy,
            message: None,
        }
    } else {
        HealthCheck {
            name: "rabbitmq".into(),
            status: HealthStatus::Degraded,
            message: Some("channel closed".into()),
        }
    };

    let response = HealthResponse::healthy("kindred-discovery", env!("CARGO_PKG_VERSION"))
        .with_checks(vec![database, events]);

    let status = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status, Json(response)).into_response()
}

/// Returns Prometheus metrics.
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state
        .metrics_handle
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default()
}

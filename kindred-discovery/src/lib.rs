pub mod config;
pub mod events;
pub mod matching;
pub mod models;
pub mod routes;
pub mod schema;
pub mod services;
pub mod store;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::{Extension, Router};
use metrics_exporter_prometheus::PrometheusHandle;

use kindred_shared::middleware::{metrics_middleware, JwtSecret};

use config::AppConfig;
use events::EventPublisher;
use services::{DiscoveryService, LifecycleService};
use store::{ProfileStore, RelationshipLedger};

pub struct AppState {
    pub config: AppConfig,
    pub discovery: DiscoveryService,
    pub lifecycle: LifecycleService,
    pub profiles: Arc<dyn ProfileStore>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new<S>(
        config: AppConfig,
        store: Arc<S>,
        events: Arc<dyn EventPublisher>,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Self
    where
        S: ProfileStore + RelationshipLedger + 'static,
    {
        let discovery = DiscoveryService::new(store.clone(), store.clone(), config.discovery());
        let lifecycle = LifecycleService::new(store.clone(), store.clone(), events);
        Self {
            config,
            discovery,
            lifecycle,
            profiles: store,
            metrics_handle,
        }
    }
}

/// Every route of the service. Transport layers (CORS, tracing) are added
/// by the binary.
pub fn router(state: Arc<AppState>) -> Router {
    let jwt_secret = JwtSecret(state.config.jwt_secret.clone());

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        .route("/candidates/:context", get(routes::candidates::find_candidates))
        .route(
            "/requests",
            post(routes::requests::send_request).get(routes::requests::list_incoming),
        )
        .route("/requests/:id/accept", put(routes::requests::accept_request))
        .route("/requests/:id/deny", put(routes::requests::deny_request))
        .route("/matches", get(routes::matches::list_matches))
        .route("/matches/:other_id/unmatch", post(routes::matches::unmatch))
        .route("/reports", post(routes::reports::report_user))
        .route("/location", put(routes::location::update_location))
        .layer(axum::middleware::from_fn(metrics_middleware))
        .layer(Extension(jwt_secret))
        .with_state(state)
}

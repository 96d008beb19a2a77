use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use kindred_discovery::config::AppConfig;
use kindred_discovery::store::PgStore;
use kindred_discovery::{router, AppState};
use kindred_shared::clients::db::create_pool;
use kindred_shared::clients::rabbitmq::RabbitMQClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kindred_shared::middleware::init_tracing("kindred-discovery");

    let config = AppConfig::load()?;
    let port = config.port;

    let pool = create_pool(&config.database_url, config.db_pool_size)?;
    let store = Arc::new(PgStore::new(pool));

    let rabbitmq = RabbitMQClient::connect(&config.rabbitmq_url).await?;

    let metrics_handle = kindred_shared::middleware::init_metrics()?;

    tracing::info!(
        proximity_m = config.proximity_threshold_meters,
        compatibility = ?config.compatibility_mode,
        suppression = ?config.suppression_scope,
        "discovery settings loaded"
    );

    let state = Arc::new(AppState::new(config, store, Arc::new(rabbitmq), Some(metrics_handle)));

    let app = router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "kindred-discovery starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

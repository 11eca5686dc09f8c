use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use openpersona_gateway::config::{self, GatewayConfig};
use openpersona_gateway::routes::api_routes;
use openpersona_gateway::store::{PgValveStore, ValveStore};
use openpersona_gateway::valves::ValveService;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Fail fast if the JWT secret is missing
    let _ = config::JWT_SECRET.as_str();

    let gateway = Arc::new(GatewayConfig::from_env());
    gateway.log_posture();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config::DATABASE_URL.as_str())
        .await?;
    let store = PgValveStore::new(pool);

    if *config::SEED_ON_STARTUP {
        if let Err(error) = store.seed_provider_tools(&gateway).await {
            tracing::warn!(?error, "provider key seeding failed; continuing");
        }
    }

    let store: Arc<dyn ValveStore> = Arc::new(store);
    let valves = Arc::new(ValveService::new(gateway.clone(), store));

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(valves));

    let addr: SocketAddr =
        format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT).parse()?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

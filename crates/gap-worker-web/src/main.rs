use std::net::SocketAddr;
use std::sync::Arc;

use gap_worker_core::Store;

mod handlers;

pub struct AppState {
    store: Store,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
            |_| tracing_subscriber::EnvFilter::new("info"),
        ))
        .init();

    let settings = gap_worker_core::Settings::from_env()?;
    let store = Store::open(&settings.db_path).await?;
    let state = Arc::new(AppState { store });

    let app = axum::Router::new()
        .route("/health", axum::routing::get(handlers::health))
        .route("/ready", axum::routing::get(handlers::ready))
        .route("/live", axum::routing::get(handlers::live))
        .route(
            "/analyses/{correlation_id}",
            axum::routing::get(handlers::get_analysis),
        )
        .route(
            "/analyses/{id}/retry",
            axum::routing::post(handlers::retry_analysis),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 5001));
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

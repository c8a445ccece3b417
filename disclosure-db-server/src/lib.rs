//! # Disclosure DB Server
//!
//! Thin axum shell over `disclosure-db-api`: request decoding, state
//! wiring, error→HTTP mapping and telemetry. All submission semantics live
//! in the api crate; handlers here stay at the decode/call/encode level.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use state::AppState;

use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the application router over shared state.
pub fn app(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .merge(routes::submissions::router())
        .merge(routes::revisions::router())
        .merge(routes::search::router())
        .merge(routes::admin::router())
        .layer(TraceLayer::new_for_http());
    if state.config.cors_enabled {
        router = router.layer(CorsLayer::permissive());
    }
    router.with_state(state)
}

/// Run the server until shutdown.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let state = Arc::new(AppState::connect(config).await?);
    if state.config.init_schema {
        disclosure_db_store::init_schema(&state.pool)
            .await
            .map_err(|e| ServerError::internal(format!("schema init failed: {e}")))?;
    }
    state.refresh_schema().await?;

    let addr = state.config.listen_addr;
    let router = app(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::internal(format!("failed to bind {addr}: {e}")))?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServerError::internal(format!("server error: {e}")))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

//! Router and server wiring.

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use drive_import::Orchestrator;

use crate::auth::SessionVerifier;
use crate::handlers;

/// Shared state for all routes.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: Arc<dyn SessionVerifier>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/import-from-drive", post(handlers::start_import))
        .route("/import-from-drive/item", post(handlers::import_item))
        .route("/import-from-drive/list", get(handlers::list_import))
        .route("/import-from-drive-runner", post(handlers::continue_import))
        .route("/import-from-drive-status", get(handlers::import_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(state: Arc<AppState>, addr: SocketAddr) -> anyhow::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "import server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

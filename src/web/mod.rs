//! Read-only reporting API.

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::monitor::{Fleet, Shutdown};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub fleet: Arc<Fleet>,
}

/// HTTP server exposing fleet statistics.
pub struct Server {
    state: AppState,
    port: u16,
}

impl Server {
    pub fn new(port: u16, fleet: Arc<Fleet>) -> Self {
        Self {
            state: AppState { fleet },
            port,
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/api/stats", get(handlers::handle_stats))
            .route("/api/status", get(handlers::handle_status))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until shutdown is requested.
    pub async fn start(&self, mut shutdown: Shutdown) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = self.routes();

        tracing::info!("Reporting API listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.requested().await })
            .await?;

        tracing::info!("Reporting API stopped");
        Ok(())
    }
}

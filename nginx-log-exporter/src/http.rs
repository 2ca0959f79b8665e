//! HTTP server for the Prometheus metrics endpoint.

use std::net::SocketAddr;

use anyhow::Context;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::metrics::SharedRegistry;

/// Liveness route, always served next to the metrics path.
pub const HEALTH_PATH: &str = "/health";

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    registry: SharedRegistry,
}

/// Create the HTTP router.
pub fn create_router(registry: SharedRegistry, metrics_path: &str) -> Router {
    let state = AppState { registry };

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route(HEALTH_PATH, get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.registry.render();

    (StatusCode::OK, [("content-type", CONTENT_TYPE)], body).into_response()
}

async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// A bound, not yet serving, metrics server.
pub struct HttpServer {
    registry: SharedRegistry,
    listener: TcpListener,
    metrics_path: String,
}

impl HttpServer {
    /// Bind the listen address. Failing here is fatal for the exporter.
    pub async fn bind(
        registry: SharedRegistry,
        listen_addr: SocketAddr,
        metrics_path: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", listen_addr))?;

        Ok(Self {
            registry,
            listener,
            metrics_path: metrics_path.into(),
        })
    }

    /// Address actually bound, useful when binding port 0.
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let addr = self.local_addr()?;
        let router = create_router(self.registry, &self.metrics_path);

        info!(addr = %addr, path = %self.metrics_path, "HTTP server listening");

        axum::serve(self.listener, router)
            .with_graceful_shutdown(async move {
                while !*shutdown.borrow_and_update() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .context("HTTP server error")?;

        info!("HTTP server stopped");
        Ok(())
    }
}

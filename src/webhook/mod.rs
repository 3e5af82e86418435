//! Webhook ingress: HTTP server turning authenticated requests into Task
//! and WorkflowRun creations.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::tasks::config::OperatorConfig;
use crate::tasks::types::{Error, Result};

pub mod auth;
pub mod filter;
pub mod handlers;
pub mod render;

/// Shared ingress state.
#[derive(Clone)]
pub struct AppState {
    /// Kubernetes client.
    pub client: kube::Client,
    /// Operator configuration.
    pub config: Arc<OperatorConfig>,
}

/// Build the HTTP router for the webhook ingress.
pub fn build_router(state: AppState) -> Router {
    let max_body_bytes = state.config.webhook.max_body_bytes;
    let request_timeout = Duration::from_secs(state.config.webhook.request_timeout_secs);

    Router::new()
        .route(
            "/webhooks/{namespace}/{trigger}",
            post(handlers::handle_trigger),
        )
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

/// Run the ingress server until shutdown.
pub async fn run_webhook_server(client: kube::Client, config: Arc<OperatorConfig>) -> Result<()> {
    let bind_addr = config.webhook.bind_addr.clone();
    let state = AppState { client, config };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| Error::ConfigError(format!("cannot bind webhook server to {bind_addr}: {e}")))?;
    info!("Webhook ingress listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::ConfigError(format!("webhook server error: {e}")))?;

    info!("Webhook ingress shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut signal) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            signal.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

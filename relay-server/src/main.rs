//! Demonstration binary: wires the core into a running process with a minimal HTTP
//! surface (enqueue, SSE stream, health) on top. Not the product HTTP layer — see
//! `relay_server::routes` for what's deliberately left thin.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::signal;
use tracing::{error, info};

use relay_server::bootstrap::Bootstrap;
use relay_server::routes::{self, AppState};
use relay_shared::logging;
use relay_shared::resilience::{CircuitBreaker, CircuitBreakerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_tracing();

    info!(version = env!("CARGO_PKG_VERSION"), "starting relay-server");

    let bootstrap = Arc::new(Bootstrap::bootstrap().await.map_err(|e| format!("bootstrap failed: {e}"))?);
    let bind_addr = bootstrap.config.server.bind_addr.clone();
    let shutdown_timeout_ms = bootstrap.config.server.shutdown_timeout_ms;

    let state = AppState {
        bootstrap: bootstrap.clone(),
        db_breaker: Arc::new(CircuitBreaker::new("healthz-db", CircuitBreakerConfig::default())),
    };

    let app = Router::new()
        .route("/conversations/{id}/messages", post(routes::send_message))
        .route("/conversations/{id}/events", get(routes::conversation_events))
        .route("/healthz", get(routes::healthz))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(%bind_addr, "listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    if let Err(e) = server.await {
        error!(error = %e, "http server exited with an error");
    }

    info!("shutdown signal received, stopping background workers and scheduler...");
    match tokio::time::timeout(Duration::from_millis(shutdown_timeout_ms), bootstrap.shutdown()).await {
        Ok(()) => info!("shutdown complete"),
        Err(_) => error!(timeout_ms = shutdown_timeout_ms, "graceful shutdown timed out, forcing exit"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received sigterm"),
    }
}

//! HTTP transport exposing the three SQL use cases as JSON endpoints.
//!
//! | Route | Body | Response |
//! |-------|------|----------|
//! | `POST /api/sql/generate` | [`GenerateRequest`] | [`GenerateResponse`] |
//! | `POST /api/sql/execute` | [`ExecuteRequest`] | [`ExecuteResponse`] |
//! | `POST /api/sql/test-connection` | [`ConnectionRequest`] | [`TestConnectionResponse`] |
//!
//! Every failure, including malformed bodies, is answered with
//! `400 {"error": "<message>"}`.

use crate::error::{DbError, DbResult};
use crate::models::{
    ConnectionRequest, ExecuteRequest, ExecuteResponse, GenerateRequest, GenerateResponse,
    TestConnectionResponse,
};
use crate::service::Orchestrator;
use crate::transport::Transport;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

pub const GENERATE_PATH: &str = "/api/sql/generate";
pub const EXECUTE_PATH: &str = "/api/sql/execute";
pub const TEST_CONNECTION_PATH: &str = "/api/sql/test-connection";

/// Time allowed for in-flight requests after a shutdown signal.
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

pub struct HttpTransport {
    orchestrator: Arc<Orchestrator>,
    host: String,
    port: u16,
}

impl HttpTransport {
    pub fn new(orchestrator: Arc<Orchestrator>, host: impl Into<String>, port: u16) -> Self {
        Self {
            orchestrator,
            host: host.into(),
            port,
        }
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Routes for the three endpoints, sharing one orchestrator.
    pub fn router(&self) -> Router {
        router(Arc::clone(&self.orchestrator))
    }
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route(GENERATE_PATH, post(generate))
        .route(EXECUTE_PATH, post(execute))
        .route(TEST_CONNECTION_PATH, post(test_connection))
        .with_state(AppState { orchestrator })
}

impl Transport for HttpTransport {
    async fn run(&self) -> DbResult<()> {
        let bind_addr = self.bind_addr();
        info!("Starting SQL Pilot HTTP server on {}", bind_addr);

        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            DbError::internal(format!(
                "Failed to bind to {}: {}. Check that the port is available",
                bind_addr, e
            ))
        })?;

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_notify_clone = shutdown_notify.clone();

        let shutdown_signal = async move {
            wait_for_signal().await;
            shutdown_notify_clone.notify_one();
        };

        let server = axum::serve(listener, self.router()).with_graceful_shutdown(shutdown_signal);

        // A long-running statement can hold a request open; force exit after a
        // timeout or a second signal once shutdown has started
        tokio::select! {
            result = server => {
                match result {
                    Ok(()) => info!("HTTP server stopped"),
                    Err(e) => {
                        error!(error = %e, "HTTP server error");
                        return Err(DbError::internal(format!("HTTP server error: {}", e)));
                    }
                }
            }
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for in-flight requests (send signal again to force exit)..."
                );

                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => {}
        }

        info!("Closing database connections");
        self.orchestrator.pools().close().await;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> DbResult<Json<GenerateResponse>> {
    let Json(request) = payload.map_err(rejection)?;
    state.orchestrator.generate_and_run(&request).await.map(Json)
}

async fn execute(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> DbResult<Json<ExecuteResponse>> {
    let Json(request) = payload.map_err(rejection)?;
    state.orchestrator.run_only(&request).await.map(Json)
}

async fn test_connection(
    State(state): State<AppState>,
    payload: Result<Json<ConnectionRequest>, JsonRejection>,
) -> DbResult<Json<TestConnectionResponse>> {
    let Json(request) = payload.map_err(rejection)?;
    state
        .orchestrator
        .test_connection(&request.credentials())
        .await
        .map(Json)
}

fn rejection(err: JsonRejection) -> DbError {
    DbError::invalid_input(err.body_text())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

//! Health Check and Metrics Endpoint
//!
//! Small HTTP surface for orchestrator checks and scraping.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status with connection state and registry size
//! - `GET /healthz` - Liveness check (always OK)
//! - `GET /readyz` - Readiness check (OK only while connected upstream)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::RegistryStats;
use crate::domain::connection::ConnectionState;
use crate::infrastructure::exchange::StreamMultiplexer;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Process uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream connection state.
    pub connection: ConnectionState,
    /// Active identity, if bound.
    pub identity: Option<String>,
    /// Registry size.
    pub subscriptions: SubscriptionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected upstream.
    Healthy,
    /// Connecting or reconnecting.
    Degraded,
    /// Disconnected.
    Unhealthy,
}

impl From<ConnectionState> for HealthStatus {
    fn from(state: ConnectionState) -> Self {
        if state.is_connected() {
            Self::Healthy
        } else if state.is_pending() {
            Self::Degraded
        } else {
            Self::Unhealthy
        }
    }
}

/// Registry size as reported over HTTP.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SubscriptionStatus {
    /// Active subscription keys.
    pub keys: usize,
    /// Registered listeners.
    pub listeners: usize,
    /// Keys bound to the active identity.
    pub identity_scoped: usize,
}

impl From<RegistryStats> for SubscriptionStatus {
    fn from(stats: RegistryStats) -> Self {
        Self {
            keys: stats.keys,
            listeners: stats.listeners,
            identity_scoped: stats.identity_scoped,
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    mux: StreamMultiplexer,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, mux: StreamMultiplexer) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            mux,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// stops with an error.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.mux.connection_state().is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let connection = state.mux.connection_state();

    HealthResponse {
        status: connection.into(),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        connection,
        identity: state.mux.active_identity().address().map(str::to_string),
        subscriptions: state.mux.stats().into(),
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::domain::subscription::{Listener, Params};
    use crate::infrastructure::exchange::{SupervisorConfig, WebSocketTransport};

    fn idle_state() -> (Arc<HealthServerState>, StreamMultiplexer) {
        // The supervisor is never run, so the state stays disconnected.
        let (mux, _supervisor) = StreamMultiplexer::new(
            SupervisorConfig::default(),
            WebSocketTransport::new("ws://127.0.0.1:1/ws"),
        );
        let state = Arc::new(HealthServerState::new("0.0.0-test".to_string(), mux.clone()));
        (state, mux)
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn status_follows_connection_state() {
        assert_eq!(HealthStatus::from(ConnectionState::Connected), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from(ConnectionState::Connecting), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from(ConnectionState::Reconnecting), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from(ConnectionState::Disconnected), HealthStatus::Unhealthy);
    }

    #[test]
    fn response_reports_registry_and_identity() {
        let (state, mux) = idle_state();
        let _handle = mux.subscribe(
            "l2Book",
            Params::new().with("coin", "BTC"),
            Listener::new(|_| {}),
        );
        mux.update_active_identity(Some("0xABC"));

        let response = build_health_response(&state);

        assert_eq!(response.status, HealthStatus::Unhealthy);
        assert_eq!(response.connection, ConnectionState::Disconnected);
        assert_eq!(response.identity.as_deref(), Some("0xabc"));
        assert_eq!(response.subscriptions.keys, 1);
        assert_eq!(response.subscriptions.listeners, 1);
    }

    #[tokio::test]
    async fn readiness_requires_connection() {
        let (state, _mux) = idle_state();

        let response = router(state)
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let (state, _mux) = idle_state();

        let response = router(state)
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}

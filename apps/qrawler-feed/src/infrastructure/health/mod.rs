//! Feed Health and Metrics over HTTP
//!
//! | Route | Answer |
//! |---|---|
//! | `GET /health` | JSON [`HealthResponse`]; 503 once the feed has exited |
//! | `GET /healthz` | `OK` while the process runs |
//! | `GET /readyz` | `READY` only when the feed is healthy |
//! | `GET /metrics` | Prometheus text exposition |

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::DataFeed;
use crate::infrastructure::metrics::get_metrics_handle;

/// Content type of the Prometheus text exposition format.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

// =============================================================================
// Health Response Types
// =============================================================================

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Seconds since the state was created.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Data feed state.
    pub feed: FeedStatus,
}

/// Coarse feed health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Feed active and live stream usable.
    Healthy,
    /// Live symbols requested but the live stream is down.
    Degraded,
    /// Feed has exited.
    Unhealthy,
}

/// Data feed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeedStatus {
    /// Whether the feed still accepts subscriptions.
    pub active: bool,
    /// Open subscriptions.
    pub subscriptions: usize,
    /// Distinct live symbols streamed upstream.
    pub live_symbols: usize,
    /// Whether the live connection is up.
    pub live_connected: bool,
}

impl FeedStatus {
    fn of(feed: &DataFeed) -> Self {
        Self {
            active: feed.is_active(),
            subscriptions: feed.subscription_count(),
            live_symbols: feed.live_stats().symbol_count,
            live_connected: feed.is_live_connected(),
        }
    }

    const fn health(self) -> HealthStatus {
        if !self.active {
            HealthStatus::Unhealthy
        } else if self.live_symbols > 0 && !self.live_connected {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// What the handlers read.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    feed: Arc<DataFeed>,
}

impl HealthServerState {
    /// State for `feed`, reporting `version`. Uptime counts from now.
    #[must_use]
    pub fn new(version: impl Into<String>, feed: Arc<DataFeed>) -> Self {
        Self {
            version: version.into(),
            started_at: Instant::now(),
            feed,
        }
    }

    /// Current health of the feed.
    #[must_use]
    pub fn snapshot(&self) -> HealthResponse {
        let feed = FeedStatus::of(&self.feed);
        HealthResponse {
            status: feed.health(),
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            feed,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Routes served next to the feed.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// HTTP server for probes and metrics scraping.
pub struct HealthServer {
    addr: SocketAddr,
    state: Arc<HealthServerState>,
    shutdown: CancellationToken,
}

impl HealthServer {
    /// Server on all interfaces at `port`, stopping when `shutdown` fires.
    #[must_use]
    pub fn new(port: u16, state: Arc<HealthServerState>, shutdown: CancellationToken) -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            state,
            shutdown,
        }
    }

    /// Address the server binds to.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bind and serve until shutdown.
    ///
    /// # Errors
    ///
    /// [`HealthServerError::Bind`] if the address is unavailable,
    /// [`HealthServerError::Serve`] if serving fails afterwards.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let Self {
            addr,
            state,
            shutdown,
        } = self;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HealthServerError::Bind { addr, source })?;
        tracing::info!(%addr, "Health server listening");

        axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(HealthServerError::Serve)?;

        tracing::info!(%addr, "Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = state.snapshot();
    let code = if response.status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(response))
}

async fn liveness_handler() -> &'static str {
    "OK"
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    match FeedStatus::of(&state.feed).health() {
        HealthStatus::Healthy => (StatusCode::OK, "READY"),
        HealthStatus::Degraded | HealthStatus::Unhealthy => {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }
}

async fn metrics_handler() -> Response {
    match get_metrics_handle() {
        Some(handle) => (
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            handle.render(),
        )
            .into_response(),
        None => {
            (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response()
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server failures.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// The listen address could not be bound.
    #[error("failed to bind health server to {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The server stopped with an I/O error.
    #[error("health server failed: {0}")]
    Serve(#[source] std::io::Error),
}

// =============================================================================
// Tests
// =============================================================================

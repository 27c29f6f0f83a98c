//! HTTP Surface
//!
//! Health probes, Prometheus metrics and a small JSON API over the
//! [`MarketDataService`].
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health report (503 when unhealthy)
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (stream open or budget left)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /status` - Request budget
//! - `GET /quotes/{symbol}` - Latest quote
//! - `GET /quotes?symbols=AAPL,MSFT` - Latest quotes keyed by symbol
//! - `GET /alerts/{owner}` - Active alerts for an owner
//! - `POST /alerts` - Register an alert
//! - `DELETE /alerts/{owner}/{id}` - Remove an alert

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::health::{HealthReport, HealthStatus};
use crate::application::services::market_data::MarketDataService;
use crate::domain::alert::{AlertId, Direction};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Response Types
// =============================================================================

/// `GET /health` body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Engine version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Engine health.
    #[serde(flatten)]
    pub report: HealthReport,
}

/// `POST /alerts` body.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAlertRequest {
    /// Owner of the alert.
    pub owner_id: String,
    /// Watched symbol.
    pub symbol: String,
    /// `ABOVE` or `BELOW`.
    pub direction: Direction,
    /// Threshold price.
    pub threshold_price: Decimal,
}

/// `POST /alerts` response.
#[derive(Debug, Clone, Serialize)]
pub struct CreateAlertResponse {
    /// Identifier of the new alert.
    pub id: AlertId,
}

#[derive(Debug, Deserialize)]
struct QuotesQuery {
    #[serde(default)]
    symbols: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the HTTP server.
pub struct HttpServerState {
    version: String,
    started_at: Instant,
    service: Arc<MarketDataService>,
}

impl HttpServerState {
    /// Create new server state.
    #[must_use]
    pub fn new(version: String, service: Arc<MarketDataService>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            service,
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// HTTP server for probes, metrics and the query API.
pub struct HttpServer {
    port: u16,
    state: Arc<HttpServerState>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new HTTP server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HttpServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the server encounters a
    /// fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the router.
pub fn router(state: Arc<HttpServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/status", get(status_handler))
        .route("/quotes", get(batch_quotes_handler))
        .route("/quotes/{symbol}", get(quote_handler))
        .route("/alerts", post(create_alert_handler))
        .route("/alerts/{owner}", get(list_alerts_handler))
        .route("/alerts/{owner}/{id}", delete(delete_alert_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HttpServerState>>) -> impl IntoResponse {
    let report = state.service.health_check();
    let status_code = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    let response = HealthResponse {
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        report,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HttpServerState>>) -> impl IntoResponse {
    // Ready while at least one data path is available
    if state.service.health_check().status == HealthStatus::Unhealthy {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
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
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

async fn status_handler(State(state): State<Arc<HttpServerState>>) -> impl IntoResponse {
    Json(state.service.api_status())
}

async fn quote_handler(
    State(state): State<Arc<HttpServerState>>,
    Path(symbol): Path<String>,
) -> Response {
    if symbol.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "symbol is required");
    }
    Json(state.service.get_current_quote(&symbol).await).into_response()
}

async fn batch_quotes_handler(
    State(state): State<Arc<HttpServerState>>,
    Query(query): Query<QuotesQuery>,
) -> Response {
    let symbols: Vec<&str> = query
        .symbols
        .split(',')
        .map(str::trim)
        .filter(|symbol| !symbol.is_empty())
        .collect();

    if symbols.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "symbols query parameter is required");
    }
    Json(state.service.get_batch_quotes(symbols.as_slice()).await).into_response()
}

async fn list_alerts_handler(
    State(state): State<Arc<HttpServerState>>,
    Path(owner): Path<String>,
) -> impl IntoResponse {
    Json(state.service.list_alerts(&owner))
}

async fn create_alert_handler(
    State(state): State<Arc<HttpServerState>>,
    Json(request): Json<CreateAlertRequest>,
) -> Response {
    match state.service.add_alert(
        &request.owner_id,
        &request.symbol,
        request.direction,
        request.threshold_price,
    ) {
        Ok(id) => (StatusCode::CREATED, Json(CreateAlertResponse { id })).into_response(),
        Err(e) => error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    }
}

async fn delete_alert_handler(
    State(state): State<Arc<HttpServerState>>,
    Path((owner, id)): Path<(String, String)>,
) -> Response {
    let Ok(alert_id) = id.parse::<AlertId>() else {
        return error_response(StatusCode::BAD_REQUEST, format!("invalid alert id: {id}"));
    };

    if state.service.remove_alert(&owner, alert_id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "alert not found")
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
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

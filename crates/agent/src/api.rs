//! HTTP API for sample ingestion, lookups, health checks and metrics

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use boost_lib::{
    aggregator::Aggregator,
    health::{Component, ComponentStatus, HealthRegistry},
    mirror::{MirrorSelector, SelectorError},
    models::Sample,
    observability::StructuredLogger,
    storage::StorageError,
};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub aggregator: Arc<Aggregator>,
    pub selector: MirrorSelector,
    pub logger: StructuredLogger,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, aggregator: Arc<Aggregator>) -> Self {
        let selector = MirrorSelector::new(aggregator.config(), aggregator.storage().clone());
        Self {
            health_registry,
            aggregator,
            selector,
            logger: StructuredLogger::new("agent-api"),
        }
    }

    /// Record a failed read against storage health
    async fn storage_unavailable(&self, error: StorageError) -> ApiError {
        self.health_registry
            .record_failure(Component::Storage, error.to_string())
            .await;
        ApiError::Unavailable(error.to_string())
    }
}

/// Error body returned by the `/v1` endpoints
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// One sample as posted by a page
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleInput {
    pub url: String,
    pub duration_ms: f64,
    #[serde(default)]
    pub integrity: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct MirrorQuery {
    pub integrity: String,
    pub url: String,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Aggregate a batch of samples
async fn post_samples(
    State(state): State<Arc<AppState>>,
    Json(inputs): Json<Vec<SampleInput>>,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let samples = inputs
        .into_iter()
        .map(|s| {
            Sample::new(s.url, s.duration_ms, s.integrity, s.timestamp.unwrap_or(now))
                .map_err(|e| ApiError::BadRequest(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let report = state.aggregator.aggregate(&samples).await;
    state.health_registry.observe_aggregation(&report).await;

    Ok(Json(report))
}

async fn list_stats(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let mut stats = match state.aggregator.storage().all_stats().await {
        Ok(stats) => stats,
        Err(e) => return Err(state.storage_unavailable(e).await),
    };
    stats.sort_by(|a, b| a.host.cmp(&b.host));
    Ok(Json(stats))
}

async fn get_stats(
    State(state): State<Arc<AppState>>,
    Path(host): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.aggregator.storage().get_stats(&host).await {
        Ok(Some(stats)) => Ok(Json(stats)),
        Ok(None) => Err(ApiError::NotFound(format!("no stats for {host}"))),
        Err(e) => Err(state.storage_unavailable(e).await),
    }
}

async fn get_mirrors(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MirrorQuery>,
) -> Result<impl IntoResponse, ApiError> {
    match state.selector.lookup(&query.integrity, &query.url).await {
        Ok(lookup) => Ok(Json(lookup)),
        Err(SelectorError::Url(e)) => Err(ApiError::BadRequest(e.to_string())),
        Err(SelectorError::Storage(e)) => Err(state.storage_unavailable(e).await),
    }
}

async fn sweep(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ttl = state.aggregator.config().ttl();
    let report = state.aggregator.clear_expired(ttl).await;
    state
        .logger
        .log_sweep(report.stats_removed, report.integrity_removed, report.failures);
    state.health_registry.observe_sweep(&report).await;
    Json(report)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/samples", post(post_samples))
        .route("/v1/stats", get(list_stats))
        .route("/v1/stats/:host", get(get_stats))
        .route("/v1/mirrors", get(get_mirrors))
        .route("/v1/sweep", post(sweep))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

use crate::cache::{CacheCoordinator, CacheStats};
use crate::core::{CacheError, Category, ClearReport};
use crate::monitoring::PerformanceSnapshot;
use axum::{
    Json,
    extract::{MatchedPath, Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheCoordinator>,
}

impl AppState {
    pub fn new(cache: Arc<CacheCoordinator>) -> Self {
        Self { cache }
    }
}

#[derive(Debug, Deserialize)]
pub struct ClearQuery {
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub removed: usize,
    pub memory: usize,
    pub disk: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

impl ClearResponse {
    fn new(report: ClearReport, category: Option<Category>) -> Self {
        Self {
            removed: report.total(),
            memory: report.memory,
            disk: report.disk,
            category,
        }
    }
}

/// Health check endpoint; 503 when the cache is degraded
pub async fn health_check(State(state): State<AppState>) -> Response {
    let cache = state.cache.health().await;
    let status = if cache.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = Json(json!({
        "status": if cache.is_healthy() { "healthy" } else { "degraded" },
        "service": "artifact-cache",
        "version": env!("CARGO_PKG_VERSION"),
        "cache": cache,
    }));

    (status, body).into_response()
}

/// GET /cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

/// POST /cache/clear - remove expired entries
pub async fn cache_clear_expired(State(state): State<AppState>) -> Json<ClearResponse> {
    let report = state.cache.clear_expired().await;
    debug!("Expired entries cleared via API: {}", report.total());
    Json(ClearResponse::new(report, None))
}

/// DELETE /cache/all[?category=] - unconditional clear
pub async fn cache_clear_all(
    State(state): State<AppState>,
    Query(query): Query<ClearQuery>,
) -> Result<Json<ClearResponse>, CacheError> {
    let category = query
        .category
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .map(str::parse::<Category>)
        .transpose()?;

    let report = state.cache.clear_all(category).await;
    info!(
        "Cache cleared via API ({}): {} entries",
        category.map_or("all", |c| c.as_str()),
        report.total()
    );
    Ok(Json(ClearResponse::new(report, category)))
}

/// GET /performance/stats
pub async fn performance_stats(State(state): State<AppState>) -> Json<PerformanceSnapshot> {
    Json(state.cache.monitor().snapshot())
}

/// GET /performance/report - plain-text report
pub async fn performance_report(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        state.cache.monitor().report(),
    )
}

/// POST /performance/reset
pub async fn performance_reset(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.cache.monitor().reset();
    Json(json!({ "success": true }))
}

/// GET /metrics - Prometheus metrics endpoint
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    // Refresh tier gauges before encoding
    let _ = state.cache.stats();

    match crate::metrics::encode_metrics() {
        Ok(metrics) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            metrics,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

/// Fallback for unknown routes
pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Not found", "code": 404 })),
    )
}

/// Record every request in Prometheus and the performance monitor
pub async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    // Route template, so unknown paths share one label
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    let elapsed = started.elapsed();
    let status = response.status();
    crate::metrics::record_http_request(&method, &path, status.as_u16(), elapsed.as_secs_f64());
    state
        .cache
        .monitor()
        .track_request(!status.is_server_error(), elapsed);

    response
}

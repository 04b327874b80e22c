use super::handlers::{self, AppState};
use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the Axum router with all endpoints
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Cache administration
        .route("/cache/stats", get(handlers::cache_stats))
        .route("/cache/clear", post(handlers::cache_clear_expired))
        .route("/cache/all", delete(handlers::cache_clear_all))
        // Performance monitor
        .route("/performance/stats", get(handlers::performance_stats))
        .route("/performance/report", get(handlers::performance_report))
        .route("/performance/reset", post(handlers::performance_reset))
        // Prometheus
        .route("/metrics", get(handlers::metrics_handler))
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::track_requests,
        ))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

//! airmetrics server API

use crate::app_state::{self, AppState, SharedAppState};
use crate::error::AirMetricsError;
use crate::metrics;
use crate::models;
use crate::service;
use crate::validated_json::ValidatedJson;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower::Layer;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::trace::TraceLayer;

/// `airmetrics` service type.
pub type Service = NormalizePath<Router>;

/// Returns a [axum::Router] for the airmetrics API
///
/// The router is populated with all routes as well as the following middleware:
///
/// * a [tower_http::trace::TraceLayer] for tracing requests and responses, which also records
///   request and response metrics
fn router(state: SharedAppState) -> Router {
    fn v1() -> Router<SharedAppState> {
        Router::new()
            .route("/spatial", post(spatial))
            .route("/spatial/batch", post(spatial_batch))
            .route("/temporal", post(temporal))
            .route("/subset", post(subset))
            .route("/cache", get(cache_stats).delete(cache_clear))
            .route("/producer", get(producer_info))
            .layer(
                TraceLayer::new_for_http()
                    .on_request(metrics::request_counter)
                    .on_response(metrics::record_response_metrics),
            )
    }

    Router::new()
        .route("/metrics", get(metrics::metrics_handler))
        .nest("/v1", v1())
        .with_state(state)
}

/// Returns a [crate::app::Service] for the airmetrics API
///
/// The service is populated with all routes as well as the following middleware:
///
/// * a [tower_http::normalize_path::NormalizePathLayer] for trimming trailing slashes from
///   requests
pub fn service(state: SharedAppState) -> Service {
    // Note that any middleware that should affect routing must wrap the router.
    // See
    // https://docs.rs/axum/0.6.12/axum/middleware/index.html#rewriting-request-uri-in-middleware.
    NormalizePathLayer::trim_trailing_slash().layer(router(state))
}

/// Application initialisation
///
/// Checks that the producer accepts our credentials and starts the cache prune task.
pub async fn init(state: &SharedAppState) {
    match state.producer.authenticate().await {
        Ok(true) => tracing::info!(producer = state.producer.name(), "producer authenticated"),
        Ok(false) => tracing::warn!(
            producer = state.producer.name(),
            "producer refused authentication, requests will be degraded"
        ),
        Err(err) => tracing::warn!(
            producer = state.producer.name(),
            "producer unreachable: {}",
            err
        ),
    }
    app_state::spawn_cache_pruner(state.clone());
}

/// Handler for spatial aggregations
async fn spatial(
    State(state): State<SharedAppState>,
    ValidatedJson(request_data): ValidatedJson<models::RequestData>,
) -> Result<Json<models::Response<models::SpatialSummary>>, AirMetricsError> {
    Ok(Json(service::spatial(&state, request_data).await?))
}

/// Handler for batches of spatial aggregations
async fn spatial_batch(
    State(state): State<SharedAppState>,
    ValidatedJson(batch): ValidatedJson<models::BatchRequestData>,
) -> Result<Json<Vec<models::Response<models::SpatialSummary>>>, AirMetricsError> {
    Ok(Json(service::spatial_batch(&state, batch.requests).await?))
}

/// Handler for temporal aggregations
async fn temporal(
    State(state): State<SharedAppState>,
    ValidatedJson(request_data): ValidatedJson<models::RequestData>,
) -> Result<Json<models::Response<models::TemporalSummary>>, AirMetricsError> {
    Ok(Json(service::temporal(&state, request_data).await?))
}

/// Handler for sample subsets around a point
async fn subset(
    State(state): State<SharedAppState>,
    ValidatedJson(request): ValidatedJson<models::SubsetRequest>,
) -> Result<Json<models::SubsetResponse>, AirMetricsError> {
    Ok(Json(service::subset(&state, request).await?))
}

fn cache_report(state: &AppState) -> models::CacheReport {
    models::CacheReport {
        spatial: state.spatial_cache.stats(),
        temporal: state.temporal_cache.stats(),
    }
}

async fn cache_stats(State(state): State<SharedAppState>) -> Json<models::CacheReport> {
    Json(cache_report(&state))
}

async fn cache_clear(State(state): State<SharedAppState>) -> StatusCode {
    state.spatial_cache.clear();
    state.temporal_cache.clear();
    StatusCode::NO_CONTENT
}

async fn producer_info(
    State(state): State<SharedAppState>,
) -> Result<Json<models::ProducerInfo>, AirMetricsError> {
    let authenticated = state.producer.authenticate().await?;
    Ok(Json(models::ProducerInfo {
        name: state.producer.name().to_string(),
        authenticated,
    }))
}

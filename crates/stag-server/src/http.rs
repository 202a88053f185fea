//! HTTP endpoints for the STAG service using axum.
//!
//! Endpoints:
//! - GET  /health              - health check
//! - GET  <metrics path>       - Prometheus exposition (configurable)
//! - POST /api/v1/ingest       - batch spatial event ingest
//! - GET  /api/v1/query        - spatial/temporal anchor query
//! - GET  /api/v1/anchors/:id  - single anchor lookup
//! - GET  /api/v1/metrics      - aggregate counts + live connections
//! - GET  /api/v1/ws           - WebSocket upgrade (session_id required)

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use stag_metrics::Metrics;
use stag_spatial::Repository;
use stag_types::{Anchor, ApiError, HealthResponse, MetricsInfo, QueryParams, QueryResponse, SpatialEvent};
use tokio::sync::watch;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;

use crate::client;
use crate::config::MetricsConfig;
use crate::hub::Hub;
use crate::middleware;
use crate::VERSION;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<Repository>,
    pub hub: Arc<Hub>,
    pub metrics: Arc<Metrics>,
    /// Fired when the process is shutting down; WebSocket clients drain on it.
    pub shutdown: watch::Receiver<()>,
}

/// `ApiError` rendered as an axum response: `{error, code}` with the bound
/// status.
pub struct AppError(pub ApiError);

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        });
        (status, Json(body)).into_response()
    }
}

/// Build the router with all endpoints and middleware.
pub fn router(state: AppState, metrics_cfg: &MetricsConfig) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/api/v1/ingest", post(ingest))
        .route("/api/v1/query", get(query))
        .route("/api/v1/anchors/:id", get(get_anchor))
        .route("/api/v1/metrics", get(service_metrics))
        .route("/api/v1/ws", get(ws_upgrade));

    if metrics_cfg.enabled {
        router = router.route(&metrics_cfg.path, get(metrics_exposition));
    }

    router
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::track,
        ))
        // TODO: tighten CORS and add a WS origin check before multi-origin
        // deployments.
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

// ── Handlers ────────────────────────────────────────────────────────

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        version: VERSION.into(),
        timestamp: Utc::now(),
        database: "connected".into(),
    })
}

async fn metrics_exposition(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn ingest(
    State(state): State<AppState>,
    payload: Result<Json<SpatialEvent>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(event) =
        payload.map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))?;

    if event.session_id.is_empty() {
        return Err(ApiError::BadRequest("session_id is required".into()).into());
    }
    if event.event_id.is_empty() {
        return Err(ApiError::BadRequest("event_id is required".into()).into());
    }

    state.repository.ingest(&event).await?;

    Ok(Json(json!({
        "message": "event ingested successfully",
        "event_id": event.event_id,
        "anchors_count": event.anchors.len(),
        "meshes_count": event.meshes.len(),
    })))
}

async fn query(
    State(state): State<AppState>,
    params: Result<Query<QueryParams>, QueryRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let Query(mut params) =
        params.map_err(|e| ApiError::BadRequest(format!("invalid query parameters: {e}")))?;

    if params.session_id.is_empty() && params.anchor_id.is_empty() {
        return Err(
            ApiError::BadRequest("either session_id or anchor_id must be provided".into()).into(),
        );
    }
    if !params.anchor_id.is_empty() && params.radius <= 0.0 {
        return Err(
            ApiError::BadRequest("radius must be provided when using anchor_id".into()).into(),
        );
    }

    params.limit = params.limit.clamp(0, stag_spatial::query::MAX_LIMIT);

    let response = state.repository.query(&params).await?;
    Ok(Json(response))
}

async fn get_anchor(
    State(state): State<AppState>,
    Path(anchor_id): Path<String>,
) -> Result<Json<Anchor>, AppError> {
    let anchor = state
        .repository
        .get_anchor(&anchor_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("anchor not found".into()))?;
    Ok(Json(anchor))
}

async fn service_metrics(
    State(state): State<AppState>,
) -> Result<Json<MetricsInfo>, AppError> {
    let mut info = state.repository.get_metrics().await?;
    info.active_connections = state.hub.active_connections();
    Ok(Json(info))
}

#[derive(Deserialize)]
struct WsQuery {
    #[serde(default)]
    session_id: String,
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    if params.session_id.is_empty() {
        return AppError(ApiError::BadRequest(
            "session_id query parameter is required".into(),
        ))
        .into_response();
    }

    ws.on_upgrade(move |socket| {
        client::serve_connection(
            socket,
            params.session_id,
            state.hub,
            state.repository,
            state.metrics,
            state.shutdown,
        )
    })
}

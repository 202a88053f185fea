//! Request logging and HTTP metrics middleware.

use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::http::AppState;

/// Record one structured log line and the request counter/duration metrics
/// per request. Metric labels use the route template; the log line carries
/// the concrete path and query.
pub async fn track(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned())
        .unwrap_or_else(|| "unknown".to_owned());

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    state
        .metrics
        .http_requests_total
        .with_label_values(&[&method, &endpoint, &status.to_string()])
        .inc();
    state
        .metrics
        .http_request_duration_seconds
        .with_label_values(&[&method, &endpoint])
        .observe(latency.as_secs_f64());

    tracing::info!(
        method = %method,
        path = %path,
        status,
        latency_ms = latency.as_millis() as u64,
        "http request"
    );

    response
}

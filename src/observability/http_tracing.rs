//! # HTTP Request Tracing Middleware
//!
//! Axum middleware that wraps each liveness request in a tracing span and
//! records its latency.

use axum::{extract::Request, middleware::Next, response::Response};
use metrics::{counter, histogram};
use std::time::Instant;
use tracing::Instrument;

/// Span and metrics around one HTTP request.
pub async fn trace_http_requests(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let span = tracing::debug_span!("http_request", method = %method, path = %path);
    let response = next.run(request).instrument(span).await;

    let status = response.status().as_u16();
    let elapsed = start.elapsed();
    tracing::debug!(
        method = %method,
        path = %path,
        status,
        elapsed_ms = elapsed.as_millis() as u64,
        "Served liveness request"
    );

    let labels = [("path", path), ("status", status.to_string())];
    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

    response
}

//! Prometheus metrics for the API server.

use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex_lite::Regex;

/// Install the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "talkhead_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "talkhead_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "talkhead_http_requests_in_flight";

    // Uploads
    pub const UPLOAD_BYTES_TOTAL: &str = "talkhead_upload_bytes_total";
    pub const STREAMS_ACTIVE: &str = "talkhead_streams_active";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record bytes received for an uploaded file.
pub fn record_upload(kind: &str, bytes: u64) {
    let labels = [("kind", kind.to_string())];
    counter!(names::UPLOAD_BYTES_TOTAL, &labels).increment(bytes);
}

/// Track MJPEG streams currently being served.
pub fn stream_opened() {
    gauge!(names::STREAMS_ACTIVE).increment(1.0);
}

pub fn stream_closed() {
    gauge!(names::STREAMS_ACTIVE).decrement(1.0);
}

fn avatar_segment() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/inference/(stream|batch)/[^/]+").ok())
        .as_ref()
}

/// Sanitize path for metrics labels (remove avatar ids).
fn sanitize_path(path: &str) -> String {
    match avatar_segment() {
        Some(re) => re.replace(path, "/inference/$1/:avatar_id").to_string(),
        None => path.to_string(),
    }
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("/inference/stream/alice"), "/inference/stream/:avatar_id");
        assert_eq!(sanitize_path("/inference/batch/bob_2"), "/inference/batch/:avatar_id");
        assert_eq!(sanitize_path("/avatars/preprocess"), "/avatars/preprocess");
    }
}

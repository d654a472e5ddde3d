//! Metrics definitions for Realm Guard.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rg_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `realm`: the configured trusted realms
//! - `status`: success, error, stale (JWKS) or success, error, timeout (HTTP)
//! - `error_type`: bounded by `AuthError` variants
//! - `endpoint`: matched route templates, or "/other"

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::{Duration, Instant};

/// Initialize the Prometheus recorder and return the handle used by the
/// `/metrics` endpoint.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("rg_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // JWKS fetches are bounded by the fetch timeout (10s default)
        .set_buckets_for_metric(
            Matcher::Prefix("rg_jwks_refresh".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set JWKS refresh buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Key Store Metrics
// ============================================================================

/// Record a JWKS refresh attempt.
///
/// Metric: `rg_jwks_refresh_total`, `rg_jwks_refresh_duration_seconds`
/// Labels: `realm`, `status` ("success", "stale", "error")
pub fn record_jwks_refresh(realm: &str, status: &str, duration: Duration) {
    histogram!("rg_jwks_refresh_duration_seconds",
        "realm" => realm.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("rg_jwks_refresh_total",
        "realm" => realm.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Token / Authorization Metrics
// ============================================================================

/// Record a token verification outcome.
///
/// Metric: `rg_token_validations_total`
/// Labels: `status`, `error_type`
pub fn record_token_validation(status: &str, error_type: &str) {
    counter!("rg_token_validations_total",
        "status" => status.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a policy decision.
///
/// Metric: `rg_authorization_decisions_total`
/// Labels: `outcome` ("allowed" or an `AuthError::error_type` label)
pub fn record_authorization_decision(outcome: &str) {
    counter!("rg_authorization_decisions_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion.
///
/// Metric: `rg_http_requests_total`, `rg_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status` / `status_code`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let status = categorize_status_code(status_code);

    histogram!("rg_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("rg_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Middleware that records metrics for every HTTP response, including
/// framework-level rejections (404, 405, 415) that never reach a handler.
///
/// The endpoint label is the matched route template; unmatched paths are
/// reported as "/other".
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "/other".to_string(), |p| p.as_str().to_string());

    let response = next.run(request).await;

    record_http_request(&method, &endpoint, response.status().as_u16(), start.elapsed());

    response
}

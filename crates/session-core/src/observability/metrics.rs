//! Metrics definitions for the session layer.
//!
//! All metrics follow Prometheus naming conventions:
//! - `session_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `result`: 6 values (hit, refreshed, stale, rate_limited, lock_timeout, failed)
//! - `outcome`: success or an error kind from the error taxonomy
//! - `mode`: 2 values (static, dynamic)
//! - `operation`: 4 values (create, verify, refresh, revoke)
//! - `status`: 2 values (success, error)
//!
//! Host URLs, key ids and session handles are never used as labels.

use metrics::{counter, histogram};
use std::time::Duration;

// ============================================================================
// JWKS Metrics
// ============================================================================

/// Record how a `get_keys` call was answered.
///
/// Metric: `session_jwks_cache_total`
/// Labels: `result`
pub fn record_jwks_cache(result: &'static str) {
    counter!("session_jwks_cache_total", "result" => result).increment(1);
}

/// Record one fetch attempt against one authority host.
///
/// Metric: `session_jwks_host_fetch_total`, `session_jwks_fetch_duration_seconds`
/// Labels: `outcome`
pub fn record_host_fetch(outcome: &'static str, duration: Duration) {
    histogram!("session_jwks_fetch_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());
    counter!("session_jwks_host_fetch_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// Token Metrics
// ============================================================================

/// Record an access token issuance.
///
/// Metric: `session_tokens_issued_total`
/// Labels: `mode`
pub fn record_token_issued(mode: &'static str) {
    counter!("session_tokens_issued_total", "mode" => mode).increment(1);
}

/// Record an access token verification.
///
/// Metric: `session_token_verifications_total`, `session_token_verification_duration_seconds`
/// Labels: `outcome`
pub fn record_token_verification(outcome: &'static str, duration: Duration) {
    histogram!("session_token_verification_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());
    counter!("session_token_verifications_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// Session Metrics
// ============================================================================

/// Record a session lifecycle operation.
///
/// Metric: `session_operations_total`
/// Labels: `operation`, `status`
pub fn record_session_operation(operation: &'static str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("session_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

/// Record a refresh token reuse (token theft) detection.
///
/// Metric: `session_token_theft_detected_total`
pub fn record_token_theft_detected() {
    counter!("session_token_theft_detected_total").increment(1);
}

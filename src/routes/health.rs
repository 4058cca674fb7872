//! Liveness, readiness, and version probes.
//!
//! `/health` answers 200 for as long as the process is up, no matter
//! what state the sponsor is in. `/ready` answers 503 until a usable
//! sponsor key is loaded, which keeps load balancers from routing
//! sponsorship traffic to a gateway that can only refuse it. `/version`
//! reports the build stamps baked in by the build script.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::server::AppState;

/// Probe body reported by /health and /ready.
///
/// Load balancers gate on the HTTP status. The body is for operators;
/// `sponsor.configured` tells a degraded gateway apart from a dead one.
#[derive(Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    /// "online" when sponsorships can complete, "degraded" otherwise
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub timestamp: String,
    /// Network this gateway sponsors on
    pub network: String,
    pub sponsor: SponsorReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sponsorship slice of the probe body.
#[derive(Serialize)]
pub struct SponsorReport {
    pub configured: bool,
    pub allowed_targets: usize,
    pub pending_envelopes: usize,
}

fn gather_report(state: &AppState) -> HealthReport {
    let configured = state.coordinator.is_configured();

    HealthReport {
        healthy: true,
        status: if configured { "online" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        network: state.args.network.clone(),
        sponsor: SponsorReport {
            configured,
            allowed_targets: state.args.allowed_call_target_list().len(),
            pending_envelopes: state.coordinator.pending_count(),
        },
        error: (!configured).then(|| {
            "Sponsor key missing or undecodable, sponsorship requests will fail".to_string()
        }),
    }
}

/// GET /health and /healthz. Always 200 while the process runs.
pub fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let report = gather_report(&state);
    respond(StatusCode::OK, &report, r#"{"healthy":true}"#)
}

/// GET /ready and /readyz. 200 only once the sponsor key is usable.
pub fn readiness_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let report = gather_report(&state);
    let status = if report.sponsor.configured {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    respond(status, &report, r#"{"healthy":false}"#)
}

/// Build stamps reported by GET /version.
#[derive(Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub commit: &'static str,
    pub commit_full: &'static str,
    pub build_time: &'static str,
    pub service: &'static str,
}

/// GET /version. Ties a running deployment back to a commit.
pub fn version_info() -> Response<Full<Bytes>> {
    let info = BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "turnstile",
    };
    respond(StatusCode::OK, &info, r#"{"version":"unknown"}"#)
}

fn respond<T: Serialize>(
    status: StatusCode,
    body: &T,
    fallback: &'static str,
) -> Response<Full<Bytes>> {
    let encoded = serde_json::to_string(body).unwrap_or_else(|_| fallback.to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(encoded)))
        .unwrap()
}

//! Health check endpoints.
//!
//! These endpoints are used by load balancers and orchestration systems
//! to determine if the service is healthy and ready to receive traffic.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status: "ok" or "degraded".
    pub status: String,

    pub service: String,

    pub version: String,

    /// Current timestamp (ISO 8601).
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<DispatchHealth>,
}

/// State of the dispatch tables.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct DispatchHealth {
    pub job_records: usize,
    pub ephemeral_clusters: usize,
    /// Completion time of the last reconciliation pass, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reconcile: Option<String>,
    pub jobs_assigned: usize,
    pub jobs_failed: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

/// Basic health check - is the service running?
async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "prow-job-dispatcher".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        dispatch: None,
    })
}

/// Readiness check - returns 503 until a reconciliation pass has completed.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.last_reconcile();
    let ready = report.is_some();

    let response = HealthResponse {
        status: if ready { "ok" } else { "degraded" }.to_string(),
        service: "prow-job-dispatcher".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        dispatch: Some(DispatchHealth {
            job_records: state.records().len(),
            ephemeral_clusters: state.ephemeral().clusters().len(),
            last_reconcile: report.as_ref().map(|r| r.completed_at.to_rfc3339()),
            jobs_assigned: report.as_ref().map_or(0, |r| r.jobs_assigned),
            jobs_failed: report.as_ref().map_or(0, |r| r.jobs_failed),
        }),
    };

    if ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

//! Job dispatch endpoint.
//!
//! `POST /` with `{"job": "<name>"}` answers `{"cluster": "<name>"}`.
//! Ephemeral cluster jobs are scheduled round-robin by their raw name; every
//! other job is looked up in the job records after stripping a rehearsal
//! prefix.

use axum::{body::Bytes, extract::State, routing::post, Json, Router};
use cidispatch_dispatcher::naming::{is_ephemeral_job, normalize_job_name};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub job: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchResponse {
    pub cluster: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/", post(dispatch))
}

async fn dispatch(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<DispatchResponse>, ApiError> {
    let request: DispatchRequest = serde_json::from_slice(&body).map_err(|e| {
        ApiError::bad_request("invalid_request", format!("malformed request body: {e}"))
    })?;
    if request.job.is_empty() {
        return Err(ApiError::bad_request("invalid_request", "job must not be empty"));
    }

    if is_ephemeral_job(&request.job) {
        let cluster = state.ephemeral().dispatch(&request.job).map_err(|e| {
            warn!(job = %request.job, error = %e, "Ephemeral dispatch failed");
            ApiError::internal("ephemeral_dispatch_failed", e.to_string())
        })?;
        return Ok(Json(DispatchResponse { cluster }));
    }

    let job = normalize_job_name(&request.job);
    match state.records().get(job) {
        Some(record) => {
            debug!(job = %job, cluster = %record.cluster, "Dispatched job");
            Ok(Json(DispatchResponse {
                cluster: record.cluster,
            }))
        }
        None => Err(ApiError::not_found(
            "cluster_not_found",
            format!("no cluster found for job {job}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use cidispatch_dispatcher::{EphemeralScheduler, JobRecord, JobRecords, RecordMap};
    use tower::ServiceExt;

    use super::*;

    fn state() -> AppState {
        let records = JobRecords::new();
        let mut map = RecordMap::new();
        map.insert("periodic-job".to_string(), JobRecord::new("build01"));
        records.regenerate(map);
        AppState::new(records, EphemeralScheduler::new(vec!["ec-1".to_string()]))
    }

    async fn post_body(body: &'static str) -> StatusCode {
        let app = routes().with_state(state());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/")
            .body(Body::from(body))
            .unwrap();
        app.oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_known_job() {
        assert_eq!(post_body(r#"{"job":"periodic-job"}"#).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        assert_eq!(post_body("{job").await, StatusCode::BAD_REQUEST);
        assert_eq!(post_body(r#"{"name":"x"}"#).await, StatusCode::BAD_REQUEST);
        assert_eq!(post_body(r#"{"job":""}"#).await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        assert_eq!(post_body(r#"{"job":"nope"}"#).await, StatusCode::NOT_FOUND);
    }
}

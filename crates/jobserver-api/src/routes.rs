//! HTTP surface (§6): GET-only endpoints over query parameters, matching the
//! teacher's `api_routes`/handler-per-resource layout.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use jobserver_core::{JobError, JobPriority};
use serde_json::json;

use crate::state::AppState;

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs/submit", get(submit))
        .route("/jobs/status", get(status))
        .route("/jobs/result", get(result))
        .route("/jobs/cancel", get(cancel))
        .route("/status", get(pool_status))
        .route("/health", get(health))
}

fn error_response(code: StatusCode, body: serde_json::Value) -> Response {
    (code, Json(body)).into_response()
}

async fn submit(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>) -> Response {
    let Some(task) = query.get("task").cloned() else {
        return error_response(StatusCode::BAD_REQUEST, json!({ "error": "missing task" }));
    };
    let priority = query
        .get("priority")
        .map(|p| JobPriority::parse(p))
        .unwrap_or(JobPriority::Normal);

    let mut params = query;
    params.remove("task");
    params.remove("priority");

    match state.manager.submit(task, params, priority).await {
        Ok(job_id) => (StatusCode::OK, Json(json!({ "job_id": job_id, "status": "queued" }))).into_response(),
        Err(JobError::QueueFull) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "error": "queue full", "retry_after_ms": 1000 }),
        ),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() })),
    }
}

async fn status(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>) -> Response {
    let Some(id) = query.get("id") else {
        return error_response(StatusCode::BAD_REQUEST, json!({ "error": "missing id" }));
    };
    match state.manager.get_meta(id).await {
        Ok(job) => (
            StatusCode::OK,
            Json(json!({ "id": job.id, "status": job.status, "progress": job.status.progress(), "eta_ms": 0 })),
        )
            .into_response(),
        Err(JobError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, json!({ "error": "not found" })),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() })),
    }
}

async fn result(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>) -> Response {
    let Some(id) = query.get("id") else {
        return error_response(StatusCode::BAD_REQUEST, json!({ "error": "missing id" }));
    };
    match state.manager.get_result(id).await {
        Ok(artifact) => {
            let mut response = Response::builder().status(artifact.status_code);
            for (name, value) in &artifact.headers {
                response = response.header(name.as_str(), value.as_str());
            }
            response.body(axum::body::Body::from(artifact.body)).unwrap()
        }
        Err(JobError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, json!({ "error": "not found" })),
        Err(JobError::ResultNotReady(status)) => {
            error_response(StatusCode::CONFLICT, json!({ "error": "result not ready", "status": status }))
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() })),
    }
}

async fn cancel(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>) -> Response {
    let Some(id) = query.get("id") else {
        return error_response(StatusCode::BAD_REQUEST, json!({ "error": "missing id" }));
    };
    match state.manager.cancel(id).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "canceled" }))).into_response(),
        Err(JobError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, json!({ "error": "not found" })),
        Err(JobError::NotCancelable(status)) => {
            error_response(StatusCode::CONFLICT, json!({ "error": "not cancelable", "status": status }))
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() })),
    }
}

/// Operational snapshot of every initialized pool, outside the four
/// core endpoints §6 enumerates but useful for monitoring (ambient stack,
/// not a spec Non-goal).
async fn pool_status(State(state): State<AppState>) -> Response {
    let uptime_secs = (chrono::Utc::now() - state.started_at).num_seconds().max(0);
    let pools = state.manager.pool_snapshots().await;
    (StatusCode::OK, Json(json!({ "uptime_secs": uptime_secs, "pools": pools }))).into_response()
}

async fn health(State(_state): State<AppState>) -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

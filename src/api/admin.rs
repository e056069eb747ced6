//! Administrative queue and template endpoints.
//!
//! Mounted behind the API key middleware.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, Result};
use crate::queue::{Job, QueueError, QueueName, QueueStats};
use crate::server::AppState;

const DEFAULT_FAILED_LIMIT: usize = 20;

fn parse_queue(raw: &str) -> Result<QueueName> {
    raw.parse::<QueueName>()
        .map_err(|other| AppError::from(QueueError::UnknownQueue(other)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatsResponse {
    pub email: QueueStats,
    pub in_app: QueueStats,
    pub timestamp: String,
}

/// GET /notifications/admin/queue/stats
#[tracing::instrument(name = "http.queue_stats", skip(state))]
pub async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStatsResponse>> {
    Ok(Json(QueueStatsResponse {
        email: state.email_queue.stats().await?,
        in_app: state.in_app_queue.stats().await?,
        timestamp: Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryRequest {
    pub queue_type: String,
}

/// POST /notifications/admin/queue/retry - Re-submit every failed job of a queue
#[tracing::instrument(name = "http.retry_failed", skip(state, payload))]
pub async fn retry_failed(
    State(state): State<AppState>,
    payload: std::result::Result<Json<RetryRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(request) = payload?;
    let name = parse_queue(&request.queue_type)?;
    let retried = state.queue(name).retry_failed().await?;

    Ok(Json(json!({
        "success": true,
        "queueType": name,
        "retried": retried,
    })))
}

#[derive(Debug, Deserialize)]
pub struct FailedQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedJobsResponse {
    pub queue_type: QueueName,
    pub jobs: Vec<Job>,
    pub total: usize,
}

/// GET /notifications/admin/queue/:queue_type/failed - Failed job history, newest first
#[tracing::instrument(name = "http.failed_jobs", skip(state))]
pub async fn failed_jobs(
    State(state): State<AppState>,
    Path(queue_type): Path<String>,
    Query(query): Query<FailedQuery>,
) -> Result<Json<FailedJobsResponse>> {
    let name = parse_queue(&queue_type)?;
    let jobs = state
        .queue(name)
        .failed_jobs(query.limit.unwrap_or(DEFAULT_FAILED_LIMIT))
        .await?;
    let total = jobs.len();

    Ok(Json(FailedJobsResponse {
        queue_type: name,
        jobs,
        total,
    }))
}

/// POST /notifications/admin/queue/:queue_type/pause
#[tracing::instrument(name = "http.pause_queue", skip(state))]
pub async fn pause_queue(
    State(state): State<AppState>,
    Path(queue_type): Path<String>,
) -> Result<Json<Value>> {
    let name = parse_queue(&queue_type)?;
    state.queue(name).pause();

    Ok(Json(json!({ "queueType": name, "paused": true })))
}

/// POST /notifications/admin/queue/:queue_type/resume
#[tracing::instrument(name = "http.resume_queue", skip(state))]
pub async fn resume_queue(
    State(state): State<AppState>,
    Path(queue_type): Path<String>,
) -> Result<Json<Value>> {
    let name = parse_queue(&queue_type)?;
    state.queue(name).resume();

    Ok(Json(json!({ "queueType": name, "paused": false })))
}

#[derive(Debug, Default, Deserialize)]
pub struct InvalidateRequest {
    pub name: Option<String>,
}

/// POST /notifications/admin/templates/invalidate - Drop one or all compiled templates
///
/// The body is optional; without a `name` the whole cache is cleared.
#[tracing::instrument(name = "http.invalidate_templates", skip(state, body))]
pub async fn invalidate_templates(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    let request: InvalidateRequest = if body.is_empty() {
        InvalidateRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::Validation(e.to_string()))?
    };

    let invalidated = match request.name.as_deref() {
        Some(name) => usize::from(state.renderer.invalidate(name)),
        None => state.renderer.invalidate_all(),
    };

    Ok(Json(json!({
        "success": true,
        "name": request.name,
        "invalidated": invalidated,
    })))
}

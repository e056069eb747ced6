//! Event ingestion endpoints.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::events::{DispatchedJob, EventType, EventTypeInfo};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    pub event_type: Option<String>,
    pub data: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub event_type: String,
    pub processed_notifications: usize,
    pub jobs: Vec<DispatchedJob>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTypesResponse {
    pub event_types: Vec<EventTypeInfo>,
    pub total: usize,
}

/// POST /events - Route a domain event to the notification queues
#[tracing::instrument(name = "http.ingest_event", skip(state, payload))]
pub async fn ingest_event(
    State(state): State<AppState>,
    payload: std::result::Result<Json<EventRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EventResponse>)> {
    let Json(request) = payload?;

    let event_type = request
        .event_type
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::Validation("eventType is required".to_string()))?;
    let data = request
        .data
        .filter(|d| !d.is_null())
        .ok_or_else(|| AppError::Validation("data is required".to_string()))?;

    let jobs = state.router.dispatch(&event_type, data).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EventResponse {
            event_type,
            processed_notifications: jobs.len(),
            jobs,
        }),
    ))
}

/// GET /events/types - Supported event types and their required fields
pub async fn list_event_types() -> Json<EventTypesResponse> {
    let event_types: Vec<EventTypeInfo> = EventType::ALL.into_iter().map(EventTypeInfo::from).collect();
    let total = event_types.len();

    Json(EventTypesResponse { event_types, total })
}

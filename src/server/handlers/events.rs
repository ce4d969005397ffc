use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::server::auth::AuthedTenant;
use crate::server::config::AppState;
use crate::server::error::ApiError;
use crate::server::models::EventKind;

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub since: Option<i64>,
    pub types: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    #[serde(rename = "eventIds", alias = "event_ids")]
    pub event_ids: Vec<String>,
}

/// Unacknowledged events, oldest first, monotonic `created_at` for
/// since-based polling.
pub async fn activity(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Value>, ApiError> {
    let kinds = match &query.types {
        Some(raw) => {
            let mut kinds = Vec::new();
            for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let kind: EventKind = part.parse().map_err(ApiError::Validation)?;
                kinds.push(kind);
            }
            Some(kinds)
        }
        None => None,
    };
    let limit = query.limit.unwrap_or(100).clamp(1, 500);

    let events = state
        .events
        .unacknowledged(tenant.id, query.since, kinds.as_deref(), limit)
        .await?;
    let count = events.len();

    Ok(Json(json!({ "events": events, "count": count })))
}

pub async fn acknowledge(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    Json(request): Json<AcknowledgeRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.event_ids.is_empty() {
        return Err(ApiError::validation("eventIds must not be empty"));
    }
    if request.event_ids.len() > 500 {
        return Err(ApiError::validation("at most 500 eventIds per call"));
    }

    let (acknowledged, remaining) = state
        .events
        .acknowledge(tenant.id, &request.event_ids)
        .await?;

    Ok(Json(json!({
        "acknowledged": acknowledged,
        "remaining": remaining,
    })))
}

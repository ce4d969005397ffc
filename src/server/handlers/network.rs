use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::server::auth::AuthedTenant;
use crate::server::config::AppState;
use crate::server::error::ApiError;
use crate::server::handlers::metrics::with_cache_marker;

#[derive(Debug, Deserialize)]
pub struct SuggestionsQuery {
    pub limit: Option<i64>,
    pub filters: Option<String>,
}

pub async fn follow_suggestions(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    Query(query): Query<SuggestionsQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(10).clamp(1, 50);
    let mut exclude_followers = false;
    if let Some(filters) = &query.filters {
        for filter in filters.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match filter {
                "exclude_followers" => exclude_followers = true,
                other => {
                    return Err(ApiError::validation(format!("unknown filter '{other}'")))
                }
            }
        }
    }

    let insights = state.insights.clone();
    let cache_key = format!("follow_suggestions:{limit}:{exclude_followers}");
    let result = insights
        .get_or_compute(tenant.id, &cache_key, "current", insights.ttl_default(), || {
            let insights = state.insights.clone();
            async move {
                insights
                    .follow_suggestions_payload(tenant.id, limit, exclude_followers)
                    .await
            }
        })
        .await?;
    Ok(Json(with_cache_marker(result.payload, result.cached)))
}

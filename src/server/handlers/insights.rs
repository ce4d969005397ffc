use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::server::auth::AuthedTenant;
use crate::server::config::AppState;
use crate::server::error::ApiError;
use crate::server::handlers::metrics::with_cache_marker;
use crate::server::period::Period;

#[derive(Debug, Deserialize)]
pub struct BestTimesQuery {
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TopEngagersQuery {
    pub period: Option<String>,
    pub min_interactions: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ShouldEngageQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StrategyQuery {
    pub include: Option<String>,
    pub period: Option<String>,
}

pub async fn best_posting_times(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    Query(query): Query<BestTimesQuery>,
) -> Result<Json<Value>, ApiError> {
    let period = Period::parse_or_default(query.period.as_deref())?;
    let insights = state.insights.clone();
    let days = period.days();
    let result = insights
        .get_or_compute(
            tenant.id,
            "best_posting_times",
            &period.label,
            insights.ttl_recommendation(),
            || {
                let insights = state.insights.clone();
                async move {
                    insights
                        .best_posting_times_payload(tenant.id, days)
                        .await
                }
            },
        )
        .await?;
    Ok(Json(with_cache_marker(result.payload, result.cached)))
}

pub async fn top_engagers(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    Query(query): Query<TopEngagersQuery>,
) -> Result<Json<Value>, ApiError> {
    let period = Period::parse_or_default(query.period.as_deref())?;
    let min_interactions = query.min_interactions.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);

    let insights = state.insights.clone();
    let cache_key = format!("top_engagers:{min_interactions}:{limit}");
    let days = period.days();
    let result = insights
        .get_or_compute(
            tenant.id,
            &cache_key,
            &period.label,
            insights.ttl_raw(),
            || {
                let insights = state.insights.clone();
                async move {
                    insights
                        .top_engagers_payload(tenant.id, days, min_interactions, limit)
                        .await
                }
            },
        )
        .await?;
    Ok(Json(with_cache_marker(result.payload, result.cached)))
}

/// Never cached: the list must shrink the moment an event is acknowledged.
pub async fn should_engage(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    Query(query): Query<ShouldEngageQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let payload = state.insights.should_engage_payload(tenant.id, limit).await?;
    Ok(Json(payload))
}

pub async fn posting_strategy(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    Query(query): Query<StrategyQuery>,
) -> Result<Json<Value>, ApiError> {
    let period = Period::parse_or_default(query.period.as_deref())?;
    let include_raw = query
        .include
        .unwrap_or_else(|| "timing,content_mix,frequency".into());
    let include: Vec<&str> = include_raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    for section in &include {
        if !matches!(*section, "timing" | "content_mix" | "frequency") {
            return Err(ApiError::validation(format!(
                "unknown strategy section '{section}'"
            )));
        }
    }

    let insights = state.insights.clone();
    let cache_key = format!("posting_strategy:{}", include.join("+"));
    let include_owned: Vec<String> = include.iter().map(|s| s.to_string()).collect();
    let days = period.days();
    let result = insights
        .get_or_compute(
            tenant.id,
            &cache_key,
            &period.label,
            insights.ttl_recommendation(),
            || {
                let insights = state.insights.clone();
                async move {
                    let include: Vec<&str> =
                        include_owned.iter().map(String::as_str).collect();
                    insights
                        .posting_strategy_payload(tenant.id, days, &include)
                        .await
                }
            },
        )
        .await?;
    Ok(Json(with_cache_marker(result.payload, result.cached)))
}

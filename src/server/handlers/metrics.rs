use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::relay::nip19::normalize_pubkey;
use crate::server::auth::AuthedTenant;
use crate::server::config::AppState;
use crate::server::error::ApiError;
use crate::server::models::NetworkActivityKind;
use crate::server::period::Period;
use crate::server::services::scanner::ScanError;

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostsQuery {
    pub limit: Option<i64>,
    pub sort: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NetworkActivityQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QuickScanQuery {
    pub npub: String,
    pub period: Option<String>,
}

pub async fn summary(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
) -> Result<Json<Value>, ApiError> {
    let counters = state.activity.summary(tenant.id).await?;
    Ok(Json(json!({ "summary": counters })))
}

pub async fn followers(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<Value>, ApiError> {
    let period = Period::parse_or_default(query.period.as_deref())?;
    let since = period.since(chrono::Utc::now().timestamp());
    let gains = state.activity.follower_gains(tenant.id, since).await?;
    let total: i64 = gains.iter().map(|g| g.count).sum();
    Ok(Json(json!({
        "period": period.label,
        "gained": total,
        "series": gains,
    })))
}

pub async fn posts(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    Query(query): Query<PostsQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let sort = query.sort.unwrap_or_else(|| "recent".into());
    if sort != "recent" && sort != "engagement" {
        return Err(ApiError::validation("sort must be 'recent' or 'engagement'"));
    }
    let posts = state.activity.posts(tenant.id, limit, &sort).await?;
    Ok(Json(json!({ "posts": posts })))
}

pub async fn network_activity(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    Query(query): Query<NetworkActivityQuery>,
) -> Result<Json<Value>, ApiError> {
    let kind: NetworkActivityKind = query
        .kind
        .as_deref()
        .unwrap_or("follower_post")
        .parse()
        .map_err(ApiError::Validation)?;
    let period = Period::parse_or_default(query.period.as_deref())?;

    let insights = state.insights.clone();
    let cache_key = format!("network_activity:{kind}");
    let days = period.days();
    let result = insights
        .get_or_compute(tenant.id, &cache_key, &period.label, insights.ttl_raw(), || {
            let insights = state.insights.clone();
            async move {
                insights
                    .network_activity_payload(tenant.id, kind, days)
                    .await
            }
        })
        .await?;

    Ok(Json(with_cache_marker(result.payload, result.cached)))
}

/// Public endpoint: transient scan by npub or hex pubkey, nothing stored.
pub async fn quick_scan(
    State(state): State<AppState>,
    Query(query): Query<QuickScanQuery>,
) -> Result<Json<Value>, ApiError> {
    let pubkey = normalize_pubkey(&query.npub)
        .map_err(|e| ApiError::validation(format!("invalid npub: {e}")))?;
    let period = Period::parse_or_default(query.period.as_deref())?;

    match state.scanner.quick_scan(&pubkey, period.days()).await {
        Ok(report) => Ok(Json(json!({
            "success": true,
            "period": period.label,
            "pubkey": report.pubkey,
            "posts_analyzed": report.posts_analyzed,
            "following": report.following,
            "zone_of_participation": report.zone,
            "peak_hours": report.peak_hours,
        }))),
        Err(ScanError::NoContactList) => Ok(Json(json!({
            "success": false,
            "reason": "no contact list",
        }))),
        Err(ScanError::Other(e)) => Err(ApiError::Internal(e)),
    }
}

pub(crate) fn with_cache_marker(mut payload: Value, cached: bool) -> Value {
    if let Some(object) = payload.as_object_mut() {
        object.insert("cached".into(), json!(cached));
    }
    payload
}

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::server::auth::AuthedTenant;
use crate::server::config::AppState;
use crate::server::error::ApiError;
use crate::server::period::Period;
use crate::server::services::scanner::ScanError;

#[derive(Debug, Deserialize, Default)]
pub struct PeriodBody {
    pub period: Option<String>,
}

/// Full network scan for the calling tenant; repopulates the timing tables
/// and drops the tenant's cached insights.
pub async fn scan_network(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    body: Option<Json<PeriodBody>>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.unwrap_or_default();
    let period = Period::parse_or_default(body.period.as_deref())?;

    info!(tenant_id = tenant.id, period = %period.label, "network scan requested");

    match state.scanner.full_scan(&tenant, period.days()).await {
        Ok(report) => Ok(Json(json!({
            "success": true,
            "period": period.label,
            "following_scanned": report.following_scanned,
            "followers_scanned": report.followers_scanned,
            "posts_analyzed": report.posts_analyzed,
        }))),
        Err(ScanError::NoContactList) => Ok(Json(json!({
            "success": false,
            "reason": "no contact list",
        }))),
        Err(ScanError::Other(e)) => Err(ApiError::Internal(e)),
    }
}

/// Re-run the timing aggregation over the requested window and invalidate
/// cached insights so the next read recomputes.
pub async fn aggregate_activity(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    body: Option<Json<PeriodBody>>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.unwrap_or_default();
    let period = Period::parse_or_default(body.period.as_deref())?;

    state
        .aggregator
        .aggregate_tenant(tenant.id, period.days())
        .await?;
    state.insights.invalidate_tenant(tenant.id).await?;

    Ok(Json(json!({
        "success": true,
        "period": period.label,
    })))
}

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::relay::nip19::{encode_npub, normalize_pubkey};
use crate::server::auth::AuthedTenant;
use crate::server::config::AppState;
use crate::server::error::ApiError;
use crate::server::models::Tenant;
use crate::server::services::tenant_store::RegisterError;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub pubkey: String,
    #[serde(rename = "callbackUrl", alias = "callback_url")]
    pub callback_url: String,
    #[serde(rename = "callbackSecret", alias = "callback_secret", default)]
    pub callback_secret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub tenant_id: i64,
    pub pubkey: String,
    pub api_token: String,
    pub callback_secret: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWebhookRequest {
    #[serde(rename = "callbackUrl", alias = "callback_url", default)]
    pub callback_url: Option<String>,
    #[serde(rename = "callbackSecret", alias = "callback_secret", default)]
    pub callback_secret: Option<String>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let pubkey = normalize_pubkey(&request.pubkey)
        .map_err(|e| ApiError::validation(format!("invalid pubkey: {e}")))?;
    validate_callback_url(&request.callback_url)?;

    let tenant = state
        .tenants
        .register(&pubkey, &request.callback_url, request.callback_secret)
        .await
        .map_err(|e| match e {
            RegisterError::DuplicatePubkey => ApiError::conflict("pubkey is already registered"),
            RegisterError::Other(e) => ApiError::Internal(e),
        })?;

    info!(tenant_id = tenant.id, "tenant registered");

    // Make the new tenant visible to the relay pool without waiting for the
    // next reload tick.
    if state.registry.reload_from(&state.tenants).await.unwrap_or(false) {
        state.relay_pool.update_tenants(&state.registry.all_pubkeys());
    }

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            tenant_id: tenant.id,
            pubkey: tenant.pubkey,
            api_token: tenant.api_token,
            callback_secret: tenant.callback_secret,
        }),
    ))
}

pub async fn me(AuthedTenant(tenant): AuthedTenant) -> Json<Value> {
    Json(tenant_view(&tenant))
}

pub async fn update_webhook(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    Json(request): Json<UpdateWebhookRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.callback_url.is_none() && request.callback_secret.is_none() {
        return Err(ApiError::validation(
            "provide callbackUrl and/or callbackSecret",
        ));
    }
    if let Some(url) = &request.callback_url {
        validate_callback_url(url)?;
    }

    let updated = state
        .tenants
        .update_webhook(
            tenant.id,
            request.callback_url.as_deref(),
            request.callback_secret.as_deref(),
        )
        .await?
        .ok_or_else(|| ApiError::not_found("tenant not found"))?;

    Ok(Json(tenant_view(&updated)))
}

fn tenant_view(tenant: &Tenant) -> Value {
    json!({
        "tenant_id": tenant.id,
        "pubkey": tenant.pubkey,
        "npub": encode_npub(&tenant.pubkey).ok(),
        "callback_url": tenant.callback_url,
        "tier": tenant.tier,
        "created_at": tenant.created_at,
        "last_active": tenant.last_active,
    })
}

fn validate_callback_url(url: &str) -> Result<(), ApiError> {
    let parsed = url::Url::parse(url)
        .map_err(|_| ApiError::validation("callback URL is not a valid URL"))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ApiError::validation("callback URL must be http or https"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_url_validation() {
        assert!(validate_callback_url("https://example.com/hook").is_ok());
        assert!(validate_callback_url("http://localhost:8080/x").is_ok());
        assert!(validate_callback_url("ftp://example.com").is_err());
        assert!(validate_callback_url("not a url").is_err());
    }
}

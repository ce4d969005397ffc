use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;

use crate::server::config::AppState;
use crate::server::error::ApiError;
use crate::server::models::Tenant;

/// The authenticated tenant, injected into request extensions by
/// `require_auth` and pulled out by handlers.
#[derive(Debug, Clone)]
pub struct AuthedTenant(pub Tenant);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthedTenant {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthedTenant>()
            .cloned()
            .ok_or(ApiError::Unauthorized)
    }
}

/// Bearer auth plus per-(tenant, endpoint, hour) rate limiting. Over-limit
/// requests are rejected before any business logic runs; successful ones
/// get the `X-RateLimit-*` accounting headers stamped on the response.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&request).ok_or(ApiError::Unauthorized)?;
    let grant = state
        .tenants
        .find_by_token(&token)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let endpoint = endpoint_group(request.uri().path());
    if !grant.allows(&endpoint) {
        return Err(ApiError::Forbidden);
    }
    let tenant = grant.tenant;

    let now = chrono::Utc::now().timestamp();
    let hour_bucket = now / 3600;
    let reset_at = (hour_bucket + 1) * 3600;
    let limit = state.config.rate_limit_for(tenant.tier());

    let used = state
        .tenants
        .hit_rate_limit(tenant.id, &endpoint, hour_bucket)
        .await?;
    if used > limit {
        return Err(ApiError::RateLimited { limit, reset_at });
    }

    state.tenants.touch_last_active(tenant.id).await.ok();

    request.extensions_mut().insert(AuthedTenant(tenant));
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert(HeaderName::from_static("x-ratelimit-limit"), num(limit));
    headers.insert(
        HeaderName::from_static("x-ratelimit-remaining"),
        num((limit - used).max(0)),
    );
    headers.insert(HeaderName::from_static("x-ratelimit-reset"), num(reset_at));

    Ok(response)
}

fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Rate limits are accounted per top-level API area.
fn endpoint_group(path: &str) -> String {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or("root")
        .to_string()
}

fn num(n: i64) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_groups_by_first_segment() {
        assert_eq!(endpoint_group("/metrics/summary"), "metrics");
        assert_eq!(endpoint_group("/insights/top-engagers"), "insights");
        assert_eq!(endpoint_group("/"), "");
    }
}

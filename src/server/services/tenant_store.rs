use anyhow::{Context, Result};
use rand::RngCore;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::server::models::{ApiCredential, Tenant};

#[derive(Error, Debug)]
pub enum RegisterError {
    #[error("pubkey is already registered")]
    DuplicatePubkey,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A resolved bearer token. `scopes` is `None` for legacy tenant tokens
/// (full access) and the credential's scope list otherwise, where an empty
/// list or `*` also means full access.
#[derive(Debug, Clone)]
pub struct AuthGrant {
    pub tenant: Tenant,
    pub scopes: Option<String>,
}

impl AuthGrant {
    pub fn allows(&self, endpoint_group: &str) -> bool {
        match &self.scopes {
            None => true,
            Some(scopes) if scopes.trim().is_empty() => true,
            Some(scopes) => scopes
                .split([',', ' '])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .any(|scope| scope == "*" || scope == endpoint_group),
        }
    }
}

#[derive(Clone)]
pub struct TenantStore {
    pool: SqlitePool,
}

impl TenantStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn register(
        &self,
        pubkey: &str,
        callback_url: &str,
        callback_secret: Option<String>,
    ) -> Result<Tenant, RegisterError> {
        let now = chrono::Utc::now().timestamp();
        let token = generate_token("dc");
        let secret = callback_secret
            .clone()
            .unwrap_or_else(|| generate_token("whsec"));

        let result = sqlx::query_as::<_, Tenant>(
            r#"
            INSERT INTO tenants (pubkey, callback_url, callback_secret, api_token, tier, created_at, last_active)
            VALUES (?1, ?2, ?3, ?4, 'free', ?5, ?5)
            RETURNING *
            "#,
        )
        .bind(pubkey)
        .bind(callback_url)
        .bind(&secret)
        .bind(&token)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(tenant) => Ok(tenant),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                // A replay of the same registration is a safe client retry:
                // hand back the existing credentials. Only a registration
                // that disagrees with the stored row is a conflict.
                let existing = sqlx::query_as::<_, Tenant>(
                    "SELECT * FROM tenants WHERE pubkey = ?1",
                )
                .bind(pubkey)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    RegisterError::Other(
                        anyhow::Error::new(e).context("failed to look up existing tenant"),
                    )
                })?;

                match existing {
                    Some(tenant)
                        if callback_secret.as_deref() == Some(tenant.callback_secret.as_str())
                            && tenant.callback_url == callback_url =>
                    {
                        Ok(tenant)
                    }
                    _ => Err(RegisterError::DuplicatePubkey),
                }
            }
            Err(e) => Err(RegisterError::Other(
                anyhow::Error::new(e).context("failed to register tenant"),
            )),
        }
    }

    /// Resolve a bearer token. An ApiCredential match takes precedence over
    /// the legacy token embedded on the tenant; a revoked or expired
    /// credential fails authentication outright instead of falling through.
    pub async fn find_by_token(&self, token: &str) -> Result<Option<AuthGrant>> {
        let now = chrono::Utc::now().timestamp();

        let credential = sqlx::query_as::<_, ApiCredential>(
            "SELECT * FROM api_credentials WHERE token = ?1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .context("failed to look up api credential")?;

        if let Some(credential) = credential {
            if !credential.is_usable(now) {
                return Ok(None);
            }
            sqlx::query("UPDATE api_credentials SET last_used = ?1 WHERE token = ?2")
                .bind(now)
                .bind(token)
                .execute(&self.pool)
                .await
                .context("failed to stamp credential use")?;
            return Ok(self.get(credential.tenant_id).await?.map(|tenant| AuthGrant {
                tenant,
                scopes: Some(credential.scopes),
            }));
        }

        let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE api_token = ?1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .context("failed to look up tenant by token")?;
        Ok(tenant.map(|tenant| AuthGrant {
            tenant,
            scopes: None,
        }))
    }

    pub async fn get(&self, id: i64) -> Result<Option<Tenant>> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch tenant")
    }

    pub async fn all(&self) -> Result<Vec<Tenant>> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("failed to list tenants")
    }

    pub async fn update_webhook(
        &self,
        id: i64,
        callback_url: Option<&str>,
        callback_secret: Option<&str>,
    ) -> Result<Option<Tenant>> {
        sqlx::query_as::<_, Tenant>(
            r#"
            UPDATE tenants
            SET callback_url = COALESCE(?1, callback_url),
                callback_secret = COALESCE(?2, callback_secret)
            WHERE id = ?3
            RETURNING *
            "#,
        )
        .bind(callback_url)
        .bind(callback_secret)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to update webhook settings")
    }

    pub async fn touch_last_active(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE tenants SET last_active = ?1 WHERE id = ?2")
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to touch tenant")?;
        Ok(())
    }

    /// Cascades every per-tenant row through the schema's foreign keys.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tenants WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to delete tenant")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_last_summary(&self, id: i64, ts: i64) -> Result<()> {
        sqlx::query("UPDATE tenants SET last_summary_at = ?1 WHERE id = ?2")
            .bind(ts)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to stamp summary time")?;
        Ok(())
    }

    pub async fn due_for_summary(&self, now: i64) -> Result<Vec<Tenant>> {
        sqlx::query_as::<_, Tenant>(
            "SELECT * FROM tenants WHERE last_summary_at <= ?1 ORDER BY id",
        )
        .bind(now - 86_400)
        .fetch_all(&self.pool)
        .await
        .context("failed to list tenants due a summary")
    }

    pub async fn issue_credential(
        &self,
        tenant_id: i64,
        scopes: &str,
        expires_at: Option<i64>,
    ) -> Result<ApiCredential> {
        let token = generate_token("dck");
        sqlx::query_as::<_, ApiCredential>(
            r#"
            INSERT INTO api_credentials (token, tenant_id, scopes, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING *
            "#,
        )
        .bind(&token)
        .bind(tenant_id)
        .bind(scopes)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .context("failed to issue credential")
    }

    pub async fn revoke_credential(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE api_credentials SET revoked = 1 WHERE token = ?1")
            .bind(token)
            .execute(&self.pool)
            .await
            .context("failed to revoke credential")?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomic per-(tenant, endpoint, hour) counter; returns the count after
    /// this hit so the caller can compare against the tier limit.
    pub async fn hit_rate_limit(
        &self,
        tenant_id: i64,
        endpoint: &str,
        hour_bucket: i64,
    ) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO rate_limits (tenant_id, endpoint, hour_bucket, count)
            VALUES (?1, ?2, ?3, 1)
            ON CONFLICT (tenant_id, endpoint, hour_bucket)
            DO UPDATE SET count = count + 1
            RETURNING count
            "#,
        )
        .bind(tenant_id)
        .bind(endpoint)
        .bind(hour_bucket)
        .fetch_one(&self.pool)
        .await
        .context("failed to bump rate limit counter")
    }
}

fn generate_token(prefix: &str) -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{prefix}_{}", hex::encode(bytes))
}

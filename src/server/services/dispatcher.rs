use std::time::Duration;

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::json;
use sha2::Sha256;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::server::models::{Tenant, WebhookLogEntry, WebhookStatus};
use crate::server::services::activity_store::ActivityStore;
use crate::server::services::event_store::EventStore;
use crate::server::services::tenant_store::TenantStore;

pub const SIGNATURE_HEADER: &str = "X-Deep-Claw-Signature";
const USER_AGENT: &str = concat!("deepclaw-webhook/", env!("CARGO_PKG_VERSION"));

type HmacSha256 = Hmac<Sha256>;

/// Lowercase hex HMAC-SHA256 over the exact bytes transmitted.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub timeout: Duration,
    /// Slept before attempt N+1; its length bounds the attempt count.
    pub retry_delays: Vec<Duration>,
    pub poll_interval: Duration,
    pub summary_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retry_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(25),
            ],
            poll_interval: Duration::from_secs(2),
            summary_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum DeliveryOutcome {
    Sent { code: u16, attempts: u32 },
    Failed { attempts: u32 },
    Skipped,
}

/// Drains pending webhook_log rows and performs signed HTTP delivery with
/// bounded retries. At-least-once within the retry budget; the immutable
/// event id in the payload lets receivers deduplicate.
#[derive(Clone)]
pub struct WebhookDispatcher {
    pool: SqlitePool,
    tenants: TenantStore,
    client: Client,
    config: DispatcherConfig,
}

impl WebhookDispatcher {
    pub fn new(pool: SqlitePool, tenants: TenantStore, config: DispatcherConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build http client");
        Self {
            pool,
            tenants,
            client,
            config,
        }
    }

    /// Main dispatch loop: a fast-path wakeup channel from the router plus
    /// a periodic sweep that catches anything the channel missed (startup
    /// backlog, dropped wakes). Deliveries run one at a time per dispatcher
    /// so a tenant's queue preserves enqueue order.
    pub async fn run(self, mut wake: mpsc::Receiver<i64>, mut shutdown: watch::Receiver<bool>) {
        info!("webhook dispatcher started");
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                Some(id) = wake.recv() => {
                    if let Err(e) = self.deliver_by_id(id).await {
                        error!(log_id = id, error = ?e, "webhook delivery errored");
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = ?e, "webhook sweep errored");
                    }
                }
                _ = shutdown.changed() => {
                    info!("webhook dispatcher shutting down");
                    return;
                }
            }
        }
    }

    async fn sweep(&self) -> Result<()> {
        let pending = sqlx::query_as::<_, WebhookLogEntry>(
            "SELECT * FROM webhook_log WHERE status = 'pending' ORDER BY id LIMIT 50",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list pending webhooks")?;

        for entry in pending {
            if let Err(e) = self.deliver(&entry).await {
                error!(log_id = entry.id, error = ?e, "webhook delivery errored");
            }
        }
        Ok(())
    }

    pub async fn deliver_by_id(&self, id: i64) -> Result<DeliveryOutcome> {
        let entry = sqlx::query_as::<_, WebhookLogEntry>(
            "SELECT * FROM webhook_log WHERE id = ?1 AND status = 'pending'",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch webhook entry")?;

        match entry {
            Some(entry) => self.deliver(&entry).await,
            None => Ok(DeliveryOutcome::Skipped),
        }
    }

    /// Up to N attempts with the configured backoff slept before each. The
    /// callback secret is re-read per attempt so a rotation mid-job signs
    /// later attempts with the new secret.
    pub async fn deliver(&self, entry: &WebhookLogEntry) -> Result<DeliveryOutcome> {
        let max_attempts = self.config.retry_delays.len() as u32;
        let mut last_error = String::new();
        let mut last_code: Option<i64> = None;

        for attempt in 0..max_attempts {
            tokio::time::sleep(self.config.retry_delays[attempt as usize]).await;

            let Some(tenant) = self.tenants.get(entry.tenant_id).await? else {
                // Tenant deleted while the job was queued.
                self.finish(entry, WebhookStatus::Failed, None, Some("tenant gone"), attempt)
                    .await?;
                return Ok(DeliveryOutcome::Failed { attempts: attempt });
            };

            let body = entry.payload.as_bytes().to_vec();
            let signature = sign_payload(&tenant.callback_secret, &body);

            let result = self
                .client
                .post(&tenant.callback_url)
                .header("Content-Type", "application/json")
                .header(SIGNATURE_HEADER, signature)
                .body(body)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let code = response.status().as_u16();
                    last_code = Some(code as i64);
                    if response.status().is_success() {
                        self.finish(entry, WebhookStatus::Sent, Some(code as i64), None, attempt + 1)
                            .await?;
                        debug!(
                            log_id = entry.id,
                            tenant_id = entry.tenant_id,
                            code,
                            attempts = attempt + 1,
                            "webhook delivered"
                        );
                        return Ok(DeliveryOutcome::Sent {
                            code,
                            attempts: attempt + 1,
                        });
                    }
                    last_error = format!("HTTP {code}");
                    warn!(
                        log_id = entry.id,
                        tenant_id = entry.tenant_id,
                        code,
                        attempt = attempt + 1,
                        "webhook got non-2xx"
                    );
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        log_id = entry.id,
                        tenant_id = entry.tenant_id,
                        error = %e,
                        attempt = attempt + 1,
                        "webhook request failed"
                    );
                }
            }
        }

        self.finish(
            entry,
            WebhookStatus::Failed,
            last_code,
            Some(last_error.as_str()),
            max_attempts,
        )
        .await?;
        Ok(DeliveryOutcome::Failed {
            attempts: max_attempts,
        })
    }

    async fn finish(
        &self,
        entry: &WebhookLogEntry,
        status: WebhookStatus,
        http_code: Option<i64>,
        error: Option<&str>,
        attempts: u32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_log
            SET status = ?1, http_code = ?2, error = ?3, sent_at = ?4, retry_count = ?5
            WHERE id = ?6
            "#,
        )
        .bind(status.as_str())
        .bind(http_code)
        .bind(error)
        .bind(chrono::Utc::now().timestamp())
        .bind(attempts as i64)
        .bind(entry.id)
        .execute(&self.pool)
        .await
        .context("failed to record delivery result")?;
        Ok(())
    }
}

/// Once per 24h per tenant, enqueue a `daily_summary` payload even when no
/// other events occurred.
pub async fn run_summary_scheduler(
    pool: SqlitePool,
    tenants: TenantStore,
    events: EventStore,
    activity: ActivityStore,
    wake: mpsc::Sender<i64>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                info!("summary scheduler shutting down");
                return;
            }
        }

        let now = chrono::Utc::now().timestamp();
        let due = match tenants.due_for_summary(now).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = ?e, "failed to list tenants due a summary");
                continue;
            }
        };

        for tenant in due {
            match enqueue_daily_summary(&pool, &events, &activity, &tenant, now).await {
                Ok(log_id) => {
                    if tenants.set_last_summary(tenant.id, now).await.is_ok() {
                        let _ = wake.try_send(log_id);
                    }
                }
                Err(e) => {
                    error!(tenant_id = tenant.id, error = ?e, "failed to enqueue daily summary");
                }
            }
        }
    }
}

async fn enqueue_daily_summary(
    pool: &SqlitePool,
    events: &EventStore,
    activity: &ActivityStore,
    tenant: &Tenant,
    now: i64,
) -> Result<i64> {
    let since = now - 86_400;
    let counts = events.counts_since(tenant.id, since).await?;
    let zap_sats = events.zap_total_since(tenant.id, since).await?;
    let new_followers = activity.followers_since(tenant.id, since).await?;
    let new_posts = activity.posts_since(tenant.id, since).await?;

    let payload = json!({
        "event_type": "daily_summary",
        "timestamp": now,
        "period_hours": 24,
        "new_followers": new_followers,
        "posts": new_posts,
        "mentions": counts.mentions,
        "replies": counts.replies,
        "reactions": counts.reactions,
        "reposts": counts.reposts,
        "zaps": counts.zaps,
        "zap_total_sats": zap_sats,
    });

    let result = sqlx::query(
        r#"
        INSERT INTO webhook_log (tenant_id, event_id, event_type, payload, status, created_at)
        VALUES (?1, NULL, 'daily_summary', ?2, 'pending', ?3)
        "#,
    )
    .bind(tenant.id)
    .bind(payload.to_string())
    .bind(now)
    .execute(pool)
    .await
    .context("failed to enqueue daily summary")?;

    Ok(result.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_hex_hmac_over_exact_bytes() {
        let body = br#"{"event_type":"mention","timestamp":1700000000}"#;
        let signature = sign_payload("secret", body);
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // Same inputs, same output; different secret or body diverges.
        assert_eq!(signature, sign_payload("secret", body));
        assert_ne!(signature, sign_payload("other", body));
        assert_ne!(signature, sign_payload("secret", b"{}"));
    }

    #[test]
    fn default_backoff_schedule() {
        let config = DispatcherConfig::default();
        assert_eq!(
            config.retry_delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(25),
            ]
        );
    }
}

use std::fmt;

use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Pending,
    Sent,
    Failed,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Pending => "pending",
            WebhookStatus::Sent => "sent",
            WebhookStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One delivery job. `payload` holds the canonical JSON body bytes that are
/// signed and transmitted verbatim; `event_id` is the receiver-side
/// deduplication key (absent for daily summaries).
#[derive(Debug, Clone, FromRow)]
pub struct WebhookLogEntry {
    pub id: i64,
    pub tenant_id: i64,
    pub event_id: Option<String>,
    pub event_type: String,
    pub payload: String,
    pub status: String,
    pub http_code: Option<i64>,
    pub error: Option<String>,
    pub sent_at: Option<i64>,
    pub retry_count: i64,
    pub created_at: i64,
}

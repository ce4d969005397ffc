use serde::Serialize;
use sqlx::FromRow;

/// Per-(tenant, author) engagement aggregate, upserted in the same
/// transaction as the event insert.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Engager {
    pub tenant_id: i64,
    pub pubkey: String,
    pub interactions: i64,
    pub mentions: i64,
    pub replies: i64,
    pub reactions: i64,
    pub reposts: i64,
    pub zaps: i64,
    pub zap_total: i64,
    pub first_seen: i64,
    pub last_seen: i64,
}

use serde::Serialize;
use sqlx::FromRow;

/// A tenant's note with denormalized engagement counters. Counters are
/// derived from Event rows and only ever move up, in the same transaction
/// as the event insert.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Post {
    pub tenant_id: i64,
    pub note_id: String,
    pub content: String,
    pub image_url: Option<String>,
    pub posted_at: i64,
    pub reactions: i64,
    pub replies: i64,
    pub reposts: i64,
    pub impressions: i64,
    pub zap_count: i64,
    pub zap_total: i64,
}

impl Post {
    pub fn engagement_total(&self) -> i64 {
        self.reactions + self.replies + self.reposts + self.zap_count
    }
}

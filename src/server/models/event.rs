use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Internal taxonomy an observed protocol event is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Mention,
    Reply,
    Reaction,
    Repost,
    Follow,
    Zap,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Mention => "mention",
            EventKind::Reply => "reply",
            EventKind::Reaction => "reaction",
            EventKind::Repost => "repost",
            EventKind::Follow => "follow",
            EventKind::Zap => "zap",
        }
    }

    /// The webhook envelope restricts `event_type` to four values; kinds
    /// outside it are stored and counted but never dispatched.
    pub fn webhook_event_type(&self) -> Option<&'static str> {
        match self {
            EventKind::Mention | EventKind::Reply => Some("mention"),
            EventKind::Follow => Some("new_follower"),
            EventKind::Zap => Some("zap"),
            EventKind::Reaction | EventKind::Repost => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mention" => Ok(EventKind::Mention),
            "reply" => Ok(EventKind::Reply),
            "reaction" => Ok(EventKind::Reaction),
            "repost" => Ok(EventKind::Repost),
            "follow" => Ok(EventKind::Follow),
            "zap" => Ok(EventKind::Zap),
            other => Err(format!("unknown event kind '{other}'")),
        }
    }
}

/// A persisted per-tenant event row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StoredEvent {
    pub id: i64,
    pub event_id: String,
    pub tenant_id: i64,
    pub kind: String,
    pub author_pubkey: String,
    pub content: String,
    pub metadata: String,
    pub created_at: i64,
    pub acknowledged: bool,
}

/// What the router hands the store for one (tenant, event) pair.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub tenant_id: i64,
    pub event_id: String,
    pub kind: EventKind,
    pub author_pubkey: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub created_at: i64,
    /// Stored post this event engages with, when one is referenced.
    pub target_note: Option<String>,
    /// Parsed zap amount; 0 for non-zaps and unparsable invoices.
    pub zap_sats: i64,
}

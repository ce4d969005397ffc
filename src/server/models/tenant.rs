use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
        }
    }

    pub fn parse(s: &str) -> Tier {
        match s {
            "premium" => Tier::Premium,
            _ => Tier::Free,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Tenant {
    pub id: i64,
    pub pubkey: String,
    pub callback_url: String,
    pub callback_secret: String,
    pub api_token: String,
    pub tier: String,
    pub created_at: i64,
    pub last_active: i64,
    pub last_summary_at: i64,
}

impl Tenant {
    pub fn tier(&self) -> Tier {
        Tier::parse(&self.tier)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ApiCredential {
    pub token: String,
    pub tenant_id: i64,
    pub scopes: String,
    pub expires_at: Option<i64>,
    pub revoked: bool,
    pub last_used: Option<i64>,
}

impl ApiCredential {
    pub fn is_usable(&self, now: i64) -> bool {
        !self.revoked && self.expires_at.map_or(true, |exp| exp > now)
    }
}

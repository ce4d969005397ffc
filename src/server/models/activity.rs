use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Who authored a post relative to the tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityRole {
    Follower,
    Following,
    #[serde(rename = "self")]
    Own,
}

impl ActivityRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityRole::Follower => "follower",
            ActivityRole::Following => "following",
            ActivityRole::Own => "self",
        }
    }
}

impl fmt::Display for ActivityRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three aggregated histogram families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkActivityKind {
    FollowerPost,
    FollowingPost,
    Engagement,
}

impl NetworkActivityKind {
    pub const ALL: [NetworkActivityKind; 3] = [
        NetworkActivityKind::FollowerPost,
        NetworkActivityKind::FollowingPost,
        NetworkActivityKind::Engagement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkActivityKind::FollowerPost => "follower_post",
            NetworkActivityKind::FollowingPost => "following_post",
            NetworkActivityKind::Engagement => "engagement",
        }
    }
}

impl fmt::Display for NetworkActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkActivityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "follower_post" => Ok(NetworkActivityKind::FollowerPost),
            "following_post" => Ok(NetworkActivityKind::FollowingPost),
            "engagement" => Ok(NetworkActivityKind::Engagement),
            other => Err(format!("unknown activity kind '{other}'")),
        }
    }
}

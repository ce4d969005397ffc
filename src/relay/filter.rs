use serde::{Deserialize, Serialize};

/// A subscription filter in the shape relays expect inside `["REQ", ...]`
/// frames. Only the fields this service queries are modeled; everything is
/// optional and omitted from the JSON when unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(rename = "#p", skip_serializing_if = "Option::is_none")]
    pub p_tags: Option<Vec<String>>,
    #[serde(rename = "#e", skip_serializing_if = "Option::is_none")]
    pub e_tags: Option<Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u32>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn authors(mut self, authors: impl IntoIterator<Item = String>) -> Self {
        self.authors = Some(authors.into_iter().collect());
        self
    }

    pub fn p_tags(mut self, pubkeys: impl IntoIterator<Item = String>) -> Self {
        self.p_tags = Some(pubkeys.into_iter().collect());
        self
    }

    pub fn since(mut self, ts: i64) -> Self {
        self.since = Some(ts);
        self
    }

    pub fn until(mut self, ts: i64) -> Self {
        self.until = Some(ts);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

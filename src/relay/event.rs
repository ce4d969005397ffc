use serde::{Deserialize, Serialize};

pub const KIND_TEXT_NOTE: u32 = 1;
pub const KIND_CONTACT_LIST: u32 = 3;
pub const KIND_REPOST: u32 = 6;
pub const KIND_REACTION: u32 = 7;
pub const KIND_ZAP_RECEIPT: u32 = 9735;

/// A protocol-level event as relays deliver it. Relays are untrusted, so
/// every field is treated as a candidate value until the router has matched
/// tags against the tenant set and deduplicated by `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NostrEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sig: String,
}

impl NostrEvent {
    /// All values of tags named `name`, e.g. `tag_values("p")` yields every
    /// referenced pubkey.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.tags
            .iter()
            .filter(move |t| t.first().map(String::as_str) == Some(name))
            .filter_map(|t| t.get(1))
            .map(String::as_str)
    }

    pub fn p_tags(&self) -> Vec<&str> {
        self.tag_values("p").collect()
    }

    pub fn e_tags(&self) -> Vec<&str> {
        self.tag_values("e").collect()
    }

    pub fn first_tag_value<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.tag_values(name).next()
    }

    pub fn references_pubkey(&self, pubkey: &str) -> bool {
        self.tag_values("p").any(|p| p == pubkey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with_tags(tags: Vec<Vec<String>>) -> NostrEvent {
        NostrEvent {
            id: "e".repeat(64),
            pubkey: "a".repeat(64),
            created_at: 1_700_000_000,
            kind: KIND_TEXT_NOTE,
            tags,
            content: "hello".into(),
            sig: String::new(),
        }
    }

    #[test]
    fn tag_accessors_filter_by_name() {
        let event = event_with_tags(vec![
            vec!["p".into(), "pk1".into()],
            vec!["e".into(), "note1".into(), "wss://relay".into()],
            vec!["p".into(), "pk2".into()],
            vec!["t".into(), "nostr".into()],
        ]);

        assert_eq!(event.p_tags(), vec!["pk1", "pk2"]);
        assert_eq!(event.e_tags(), vec!["note1"]);
        assert_eq!(event.first_tag_value("t"), Some("nostr"));
        assert!(event.references_pubkey("pk2"));
        assert!(!event.references_pubkey("pk3"));
    }

    #[test]
    fn malformed_tags_are_skipped() {
        let event = event_with_tags(vec![vec!["p".into()], vec![]]);
        assert!(event.p_tags().is_empty());
    }

    #[test]
    fn deserializes_relay_json() {
        let raw = r#"{
            "id": "abc",
            "pubkey": "def",
            "created_at": 1700000000,
            "kind": 1,
            "tags": [["p", "pk"]],
            "content": "hi",
            "sig": "00"
        }"#;
        let event: NostrEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.kind, KIND_TEXT_NOTE);
        assert_eq!(event.p_tags(), vec!["pk"]);
    }
}

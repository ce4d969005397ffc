use serde_json::{json, Value};

use super::event::NostrEvent;
use super::filter::Filter;
use super::RelayError;

/// Frames this client sends. Relays speak JSON arrays on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage<'a> {
    Req {
        sub_id: &'a str,
        filters: &'a [Filter],
    },
    Close {
        sub_id: &'a str,
    },
}

impl ClientMessage<'_> {
    pub fn to_json(&self) -> String {
        match self {
            ClientMessage::Req { sub_id, filters } => {
                let mut frame = vec![json!("REQ"), json!(sub_id)];
                for filter in *filters {
                    frame.push(serde_json::to_value(filter).unwrap_or(Value::Null));
                }
                Value::Array(frame).to_string()
            }
            ClientMessage::Close { sub_id } => json!(["CLOSE", sub_id]).to_string(),
        }
    }
}

/// Frames this client accepts. Unknown frame types (`OK`, `CLOSED`, ...) are
/// ignored rather than treated as errors; relays are free to send them.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event { sub_id: String, event: NostrEvent },
    Eose(String),
    Notice(String),
}

impl RelayMessage {
    pub fn parse(text: &str) -> Result<Option<RelayMessage>, RelayError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RelayError::Protocol(format!("invalid json: {e}")))?;

        let frame = value
            .as_array()
            .ok_or_else(|| RelayError::Protocol("frame is not an array".into()))?;

        let kind = frame
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::Protocol("missing frame type".into()))?;

        match kind {
            "EVENT" => {
                let sub_id = frame
                    .get(1)
                    .and_then(Value::as_str)
                    .ok_or_else(|| RelayError::Protocol("EVENT missing sub id".into()))?
                    .to_string();
                let event: NostrEvent = serde_json::from_value(
                    frame
                        .get(2)
                        .cloned()
                        .ok_or_else(|| RelayError::Protocol("EVENT missing payload".into()))?,
                )
                .map_err(|e| RelayError::Protocol(format!("bad event payload: {e}")))?;
                Ok(Some(RelayMessage::Event { sub_id, event }))
            }
            "EOSE" => {
                let sub_id = frame
                    .get(1)
                    .and_then(Value::as_str)
                    .ok_or_else(|| RelayError::Protocol("EOSE missing sub id".into()))?;
                Ok(Some(RelayMessage::Eose(sub_id.to_string())))
            }
            "NOTICE" => {
                let msg = frame.get(1).and_then(Value::as_str).unwrap_or_default();
                Ok(Some(RelayMessage::Notice(msg.to_string())))
            }
            _ => Ok(None),
        }
    }
}

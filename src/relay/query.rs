use std::collections::HashSet;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use uuid::Uuid;

use super::event::NostrEvent;
use super::filter::Filter;
use super::message::{ClientMessage, RelayMessage};
use super::RelayError;

/// One-shot query against a single relay: REQ, collect until EOSE, CLOSE.
/// The whole exchange runs under `timeout`.
pub async fn fetch_events(
    url: &str,
    filters: &[Filter],
    timeout: Duration,
) -> Result<Vec<NostrEvent>, RelayError> {
    tokio::time::timeout(timeout, fetch_inner(url, filters))
        .await
        .map_err(|_| RelayError::Timeout)?
}

async fn fetch_inner(url: &str, filters: &[Filter]) -> Result<Vec<NostrEvent>, RelayError> {
    let (mut stream, _response) = connect_async(url).await?;
    let sub_id = format!("q-{}", Uuid::new_v4().simple());

    let req = ClientMessage::Req {
        sub_id: &sub_id,
        filters,
    }
    .to_json();
    stream.send(Message::Text(req)).await?;

    let mut events = Vec::new();
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match RelayMessage::parse(&text) {
                Ok(Some(RelayMessage::Event { sub_id: id, event })) if id == sub_id => {
                    events.push(event);
                }
                Ok(Some(RelayMessage::Eose(id))) if id == sub_id => break,
                Ok(Some(RelayMessage::Notice(msg))) => {
                    debug!(relay = %url, notice = %msg, "relay notice during query");
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(relay = %url, error = %e, "ignoring malformed frame during query");
                }
            },
            Some(Ok(Message::Ping(payload))) => {
                stream.send(Message::Pong(payload)).await?;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    }

    let close = ClientMessage::Close { sub_id: &sub_id }.to_json();
    let _ = stream.send(Message::Text(close)).await;
    let _ = stream.close(None).await;

    Ok(events)
}

/// Query every relay in turn, merging results and deduplicating by event id.
/// A relay that errors or times out is skipped; the scan itself never fails
/// on a single bad peer.
pub async fn fetch_from_relays(
    urls: &[String],
    filters: &[Filter],
    per_relay_timeout: Duration,
) -> Vec<NostrEvent> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::new();

    for url in urls {
        match fetch_events(url, filters, per_relay_timeout).await {
            Ok(events) => {
                for event in events {
                    if seen.insert(event.id.clone()) {
                        merged.push(event);
                    }
                }
            }
            Err(RelayError::Timeout) => {
                warn!(relay = %url, "relay query timed out, skipping");
            }
            Err(e) => {
                warn!(relay = %url, error = %e, "relay query failed, skipping");
            }
        }
    }

    merged
}

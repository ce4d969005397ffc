use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::message::{ClientMessage, RelayMessage};
use super::pool::{PoolShared, RelayFrame, RelayPoolConfig, Subscription};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Double the delay up to `max`.
pub(crate) fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// Apply +/-20% jitter so a fleet of reconnecting clients does not stampede.
pub(crate) fn jittered(delay: Duration) -> Duration {
    let millis = delay.as_millis() as u64;
    if millis == 0 {
        return delay;
    }
    let spread = millis / 5;
    let low = millis - spread;
    let high = millis + spread;
    Duration::from_millis(rand::thread_rng().gen_range(low..=high))
}

/// One long-lived connection to a single relay: connect, issue the standing
/// subscriptions, stream frames into the shared buffer, and reconnect with
/// backoff on any failure. Returns only on shutdown.
pub(crate) async fn run_relay_connection(
    url: String,
    shared: Arc<PoolShared>,
    mut subs_rx: watch::Receiver<Arc<Vec<Subscription>>>,
    mut shutdown: watch::Receiver<bool>,
    config: Arc<RelayPoolConfig>,
) {
    let mut backoff = config.initial_backoff;

    loop {
        if *shutdown.borrow() {
            return;
        }

        let connect = tokio::time::timeout(config.connect_timeout, connect_async(url.as_str()));
        let ws = tokio::select! {
            result = connect => result,
            _ = shutdown.changed() => return,
        };

        match ws {
            Ok(Ok((mut stream, _response))) => {
                info!(relay = %url, "relay connected");
                shared.mark_connected();
                backoff = config.initial_backoff;

                let outcome = drive_connection(
                    &url,
                    &mut stream,
                    &shared,
                    &mut subs_rx,
                    &mut shutdown,
                    &config,
                )
                .await;

                shared.mark_disconnected();
                if let Outcome::Shutdown = outcome {
                    let current = subs_rx.borrow().clone();
                    close_subscriptions(&mut stream, &current).await.ok();
                    let _ = stream.close(None).await;
                    return;
                }
            }
            Ok(Err(e)) => {
                warn!(relay = %url, error = %e, "relay connection failed");
            }
            Err(_) => {
                warn!(relay = %url, "relay connection timed out");
            }
        }

        let delay = jittered(backoff);
        debug!(relay = %url, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
        backoff = next_backoff(backoff, config.max_backoff);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}

enum Outcome {
    Disconnected,
    Shutdown,
}

async fn drive_connection(
    url: &str,
    stream: &mut WsStream,
    shared: &Arc<PoolShared>,
    subs_rx: &mut watch::Receiver<Arc<Vec<Subscription>>>,
    shutdown: &mut watch::Receiver<bool>,
    config: &RelayPoolConfig,
) -> Outcome {
    let mut current = subs_rx.borrow_and_update().clone();
    if send_subscriptions(stream, &current).await.is_err() {
        return Outcome::Disconnected;
    }
    let mut last_activity = tokio::time::Instant::now();

    loop {
        let heartbeat = tokio::time::sleep_until(last_activity + config.idle_heartbeat);

        tokio::select! {
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = tokio::time::Instant::now();
                        handle_frame(url, &text, shared);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        last_activity = tokio::time::Instant::now();
                        if stream.send(Message::Pong(payload)).await.is_err() {
                            return Outcome::Disconnected;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        warn!(relay = %url, "relay closed the connection");
                        return Outcome::Disconnected;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(relay = %url, error = %e, "relay socket error");
                        return Outcome::Disconnected;
                    }
                }
            }
            changed = subs_rx.changed() => {
                if changed.is_err() {
                    return Outcome::Disconnected;
                }
                let next = subs_rx.borrow_and_update().clone();
                debug!(relay = %url, subscriptions = next.len(), "reissuing subscriptions");
                if close_subscriptions(stream, &current).await.is_err()
                    || send_subscriptions(stream, &next).await.is_err()
                {
                    return Outcome::Disconnected;
                }
                current = next;
                last_activity = tokio::time::Instant::now();
            }
            _ = heartbeat => {
                // Nullipotent REQ refresh keeps idle connections alive.
                debug!(relay = %url, "idle heartbeat, refreshing subscriptions");
                if send_subscriptions(stream, &current).await.is_err() {
                    return Outcome::Disconnected;
                }
                last_activity = tokio::time::Instant::now();
            }
            _ = shutdown.changed() => {
                return Outcome::Shutdown;
            }
        }
    }
}

fn handle_frame(url: &str, text: &str, shared: &Arc<PoolShared>) {
    match RelayMessage::parse(text) {
        Ok(Some(RelayMessage::Event { event, .. })) => {
            shared.ingest(RelayFrame {
                relay: url.to_string(),
                event,
            });
        }
        Ok(Some(RelayMessage::Eose(sub_id))) => {
            debug!(relay = %url, sub_id = %sub_id, "end of stored events");
        }
        Ok(Some(RelayMessage::Notice(msg))) => {
            debug!(relay = %url, notice = %msg, "relay notice");
        }
        Ok(None) => {}
        Err(e) => {
            debug!(relay = %url, error = %e, "ignoring malformed frame");
        }
    }
}

async fn send_subscriptions(
    stream: &mut WsStream,
    subs: &[Subscription],
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    for sub in subs {
        let filters = std::slice::from_ref(&sub.filter);
        let frame = ClientMessage::Req {
            sub_id: &sub.id,
            filters,
        }
        .to_json();
        stream.send(Message::Text(frame)).await?;
    }
    Ok(())
}

async fn close_subscriptions(stream: &mut WsStream, subs: &[Subscription]) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    for sub in subs {
        let frame = ClientMessage::Close { sub_id: &sub.id }.to_json();
        stream.send(Message::Text(frame)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let max = Duration::from_secs(60);
        let mut delay = Duration::from_secs(1);
        delay = next_backoff(delay, max);
        assert_eq!(delay, Duration::from_secs(2));
        delay = next_backoff(delay, max);
        assert_eq!(delay, Duration::from_secs(4));
        for _ in 0..10 {
            delay = next_backoff(delay, max);
        }
        assert_eq!(delay, max);
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let delayed = jittered(base);
            assert!(delayed >= Duration::from_secs(8), "{delayed:?}");
            assert!(delayed <= Duration::from_secs(12), "{delayed:?}");
        }
    }
}

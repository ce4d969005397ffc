use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Notify};
use tracing::info;

use super::connection::run_relay_connection;
use super::dedup::DedupCache;
use super::event::{NostrEvent, KIND_CONTACT_LIST, KIND_TEXT_NOTE, KIND_ZAP_RECEIPT};
use super::filter::Filter;

/// A deduplicated event together with the relay that delivered it first.
#[derive(Debug, Clone)]
pub struct RelayFrame {
    pub relay: String,
    pub event: NostrEvent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: String,
    pub filter: Filter,
}

/// The three standing subscriptions, reissued whenever the tenant set
/// changes. An empty tenant set yields no subscriptions at all; a filter
/// without `#p` values would match the whole relay firehose.
pub fn standing_subscriptions(pubkeys: &[String], now: i64) -> Vec<Subscription> {
    if pubkeys.is_empty() {
        return Vec::new();
    }
    let pubkeys = pubkeys.to_vec();
    vec![
        Subscription {
            id: "notes".into(),
            filter: Filter::new()
                .kinds([KIND_TEXT_NOTE])
                .p_tags(pubkeys.clone())
                .since(now - 3600),
        },
        Subscription {
            id: "contacts".into(),
            filter: Filter::new()
                .kinds([KIND_CONTACT_LIST])
                .p_tags(pubkeys.clone())
                .since(now - 86_400),
        },
        Subscription {
            id: "zaps".into(),
            filter: Filter::new()
                .kinds([KIND_ZAP_RECEIPT])
                .p_tags(pubkeys)
                .since(now - 3600),
        },
    ]
}

#[derive(Debug, Clone)]
pub struct RelayPoolConfig {
    pub relay_urls: Vec<String>,
    pub buffer_capacity: usize,
    pub dedup_capacity: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub idle_heartbeat: Duration,
    pub connect_timeout: Duration,
}

impl Default for RelayPoolConfig {
    fn default() -> Self {
        Self {
            relay_urls: Vec::new(),
            buffer_capacity: 4096,
            dedup_capacity: 1 << 17,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            idle_heartbeat: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    pub relays_total: usize,
    pub relays_connected: usize,
    pub degraded: bool,
    pub dropped_frames: u64,
}

/// State shared between the per-relay connection tasks and the consumer
/// side. The buffer and dedup cache are owned here; connection tasks only
/// touch them through short critical sections.
pub struct PoolShared {
    buffer: Mutex<FrameBuffer>,
    notify: Notify,
    dedup: Mutex<DedupCache>,
    connected: AtomicUsize,
    relays_total: usize,
    dropped: AtomicU64,
}

impl PoolShared {
    /// Called from connection read loops. Returns `false` when the id was
    /// already seen and the frame went nowhere.
    pub(crate) fn ingest(&self, frame: RelayFrame) -> bool {
        let fresh = {
            let mut dedup = self.dedup.lock().expect("dedup lock");
            dedup.insert(&frame.event.id)
        };
        if !fresh {
            return false;
        }
        let dropped = {
            let mut buffer = self.buffer.lock().expect("buffer lock");
            buffer.push(frame)
        };
        if dropped {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        true
    }

    pub(crate) fn mark_connected(&self) {
        self.connected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_disconnected(&self) {
        self.connected.fetch_sub(1, Ordering::Relaxed);
    }

    fn pop(&self) -> Option<RelayFrame> {
        self.buffer.lock().expect("buffer lock").pop()
    }

    pub fn health(&self) -> PoolHealth {
        let connected = self.connected.load(Ordering::Relaxed);
        PoolHealth {
            relays_total: self.relays_total,
            relays_connected: connected,
            degraded: self.relays_total > 0 && connected == 0,
            dropped_frames: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Fan-in over N relay connections with id-level deduplication and a
/// bounded, priority-evicting buffer toward the event router.
#[derive(Clone)]
pub struct RelayPool {
    shared: Arc<PoolShared>,
    subs_tx: Arc<watch::Sender<Arc<Vec<Subscription>>>>,
    config: Arc<RelayPoolConfig>,
}

impl RelayPool {
    pub fn new(config: RelayPoolConfig) -> Self {
        let shared = Arc::new(PoolShared {
            buffer: Mutex::new(FrameBuffer::new(config.buffer_capacity)),
            notify: Notify::new(),
            dedup: Mutex::new(DedupCache::new(config.dedup_capacity)),
            connected: AtomicUsize::new(0),
            relays_total: config.relay_urls.len(),
            dropped: AtomicU64::new(0),
        });
        let (subs_tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            shared,
            subs_tx: Arc::new(subs_tx),
            config: Arc::new(config),
        }
    }

    /// Spawn one long-lived connection task per configured relay. A single
    /// relay outage never affects the others; each task reconnects with
    /// jittered exponential backoff on its own schedule.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) {
        for url in &self.config.relay_urls {
            info!(relay = %url, "starting relay connection");
            tokio::spawn(run_relay_connection(
                url.clone(),
                Arc::clone(&self.shared),
                self.subs_tx.subscribe(),
                shutdown.clone(),
                Arc::clone(&self.config),
            ));
        }
    }

    /// Reissue the standing subscriptions for a new tenant pubkey set.
    pub fn update_tenants(&self, pubkeys: &[String]) {
        let now = chrono::Utc::now().timestamp();
        let subs = Arc::new(standing_subscriptions(pubkeys, now));
        self.subs_tx.send_replace(subs);
    }

    /// Next deduplicated frame; waits until one is available.
    pub async fn next_frame(&self) -> RelayFrame {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(frame) = self.shared.pop() {
                return frame;
            }
            notified.await;
        }
    }

    pub fn try_next_frame(&self) -> Option<RelayFrame> {
        self.shared.pop()
    }

    pub fn health(&self) -> PoolHealth {
        self.shared.health()
    }

    pub fn shared(&self) -> Arc<PoolShared> {
        Arc::clone(&self.shared)
    }

    #[cfg(test)]
    pub(crate) fn inject(&self, relay: &str, event: NostrEvent) -> bool {
        self.shared.ingest(RelayFrame {
            relay: relay.to_string(),
            event,
        })
    }
}

/// Bounded frame queue. When full, the oldest frame of the least essential
/// kind present is evicted: zap receipts go first, then text notes, then
/// contact lists.
struct FrameBuffer {
    frames: VecDeque<RelayFrame>,
    capacity: usize,
}

fn kind_priority(kind: u32) -> u8 {
    match kind {
        KIND_CONTACT_LIST => 2,
        KIND_TEXT_NOTE => 1,
        _ => 0,
    }
}

impl FrameBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Returns `true` if a frame (old or incoming) was dropped to make room.
    fn push(&mut self, frame: RelayFrame) -> bool {
        if self.frames.len() < self.capacity {
            self.frames.push_back(frame);
            return false;
        }
        let incoming = kind_priority(frame.event.kind);
        let victim = self
            .frames
            .iter()
            .enumerate()
            .fold(None::<(usize, u8)>, |best, (idx, f)| {
                let pri = kind_priority(f.event.kind);
                match best {
                    Some((_, best_pri)) if best_pri <= pri => best,
                    _ => Some((idx, pri)),
                }
            });
        match victim {
            Some((idx, pri)) if pri <= incoming => {
                self.frames.remove(idx);
                self.frames.push_back(frame);
            }
            // Everything queued outranks the incoming frame; it is the drop.
            _ => {}
        }
        true
    }

    fn pop(&mut self) -> Option<RelayFrame> {
        self.frames.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: &str, kind: u32) -> RelayFrame {
        RelayFrame {
            relay: "wss://test".into(),
            event: NostrEvent {
                id: id.into(),
                pubkey: "pk".into(),
                created_at: 0,
                kind,
                tags: vec![],
                content: String::new(),
                sig: String::new(),
            },
        }
    }

    #[test]
    fn buffer_evicts_zaps_before_notes_before_contacts() {
        let mut buffer = FrameBuffer::new(3);
        buffer.push(frame("c1", KIND_CONTACT_LIST));
        buffer.push(frame("z1", KIND_ZAP_RECEIPT));
        buffer.push(frame("n1", KIND_TEXT_NOTE));

        assert!(buffer.push(frame("n2", KIND_TEXT_NOTE)));
        let ids: Vec<_> = buffer.frames.iter().map(|f| f.event.id.clone()).collect();
        assert_eq!(ids, vec!["c1", "n1", "n2"]);

        assert!(buffer.push(frame("c2", KIND_CONTACT_LIST)));
        let ids: Vec<_> = buffer.frames.iter().map(|f| f.event.id.clone()).collect();
        assert_eq!(ids, vec!["c1", "n2", "c2"]);
    }

    #[test]
    fn buffer_drops_incoming_when_it_is_least_essential() {
        let mut buffer = FrameBuffer::new(2);
        buffer.push(frame("c1", KIND_CONTACT_LIST));
        buffer.push(frame("c2", KIND_CONTACT_LIST));
        assert!(buffer.push(frame("z1", KIND_ZAP_RECEIPT)));
        let ids: Vec<_> = buffer.frames.iter().map(|f| f.event.id.clone()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[test]
    fn buffer_evicts_oldest_within_a_priority_class() {
        let mut buffer = FrameBuffer::new(2);
        buffer.push(frame("n1", KIND_TEXT_NOTE));
        buffer.push(frame("n2", KIND_TEXT_NOTE));
        assert!(buffer.push(frame("n3", KIND_TEXT_NOTE)));
        let ids: Vec<_> = buffer.frames.iter().map(|f| f.event.id.clone()).collect();
        assert_eq!(ids, vec!["n2", "n3"]);
    }

    #[test]
    fn pool_forwards_an_id_at_most_once() {
        let pool = RelayPool::new(RelayPoolConfig::default());
        let event = frame("dup", KIND_TEXT_NOTE).event;
        assert!(pool.inject("wss://a", event.clone()));
        assert!(!pool.inject("wss://b", event));
        assert!(pool.try_next_frame().is_some());
        assert!(pool.try_next_frame().is_none());
    }

    #[test]
    fn standing_subscriptions_cover_three_kinds() {
        let pubkeys = vec!["a".repeat(64)];
        let subs = standing_subscriptions(&pubkeys, 1_700_000_000);
        assert_eq!(subs.len(), 3);
        assert_eq!(subs[0].filter.kinds, Some(vec![KIND_TEXT_NOTE]));
        assert_eq!(subs[0].filter.since, Some(1_700_000_000 - 3600));
        assert_eq!(subs[1].filter.kinds, Some(vec![KIND_CONTACT_LIST]));
        assert_eq!(subs[1].filter.since, Some(1_700_000_000 - 86_400));
        assert_eq!(subs[2].filter.kinds, Some(vec![KIND_ZAP_RECEIPT]));
        for sub in &subs {
            assert_eq!(sub.filter.p_tags, Some(pubkeys.clone()));
        }
    }

    #[test]
    fn no_tenants_means_no_subscriptions() {
        assert!(standing_subscriptions(&[], 0).is_empty());
    }
}

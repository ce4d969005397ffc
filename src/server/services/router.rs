use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::relay::event::{
    KIND_CONTACT_LIST, KIND_REACTION, KIND_REPOST, KIND_TEXT_NOTE, KIND_ZAP_RECEIPT,
};
use crate::relay::{NostrEvent, RelayPool};
use crate::server::models::{EventKind, NewEvent};
use crate::server::services::activity_store::ActivityStore;
use crate::server::services::event_store::EventStore;
use crate::server::services::registry::TenantRegistry;
use crate::server::services::zaps::invoice_amount_sats;

/// Maps candidate relay events onto tenants, classifies them, and hands
/// them to the store. Holds no cross-event state; the store transaction is
/// the source of truth for idempotency.
#[derive(Clone)]
pub struct EventRouter {
    registry: Arc<TenantRegistry>,
    events: EventStore,
    activity: ActivityStore,
    webhook_wake: mpsc::Sender<i64>,
}

impl EventRouter {
    pub fn new(
        registry: Arc<TenantRegistry>,
        events: EventStore,
        activity: ActivityStore,
        webhook_wake: mpsc::Sender<i64>,
    ) -> Self {
        Self {
            registry,
            events,
            activity,
            webhook_wake,
        }
    }

    /// Long-lived consumer of the relay pool's deduplicated stream.
    pub async fn run(self, pool: RelayPool, mut shutdown: watch::Receiver<bool>) {
        info!("event router started");
        loop {
            tokio::select! {
                frame = pool.next_frame() => {
                    self.process(&frame.event).await;
                }
                _ = shutdown.changed() => {
                    info!("event router shutting down");
                    return;
                }
            }
        }
    }

    /// Route one candidate event. Per-tenant failures are logged and
    /// isolated; one bad event never halts the pipeline.
    pub async fn process(&self, event: &NostrEvent) {
        let tenants = self.matching_tenants(event);
        if tenants.is_empty() {
            return;
        }

        for (tenant_id, tenant_pubkey) in tenants {
            match self.build_event(event, tenant_id, &tenant_pubkey).await {
                Ok(Some(new_event)) => match self.events.record(&new_event).await {
                    Ok(Some(outcome)) => {
                        debug!(
                            tenant_id,
                            event_id = %new_event.event_id,
                            kind = %new_event.kind,
                            "event persisted"
                        );
                        if let Some(log_id) = outcome.webhook_log_id {
                            // Dropped wakes are fine; the dispatcher sweep
                            // picks the row up on its next pass.
                            let _ = self.webhook_wake.try_send(log_id);
                        }
                    }
                    Ok(None) => {
                        debug!(tenant_id, event_id = %event.id, "duplicate event ignored");
                    }
                    Err(e) => {
                        error!(tenant_id, event_id = %event.id, error = ?e, "failed to persist event");
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    error!(tenant_id, event_id = %event.id, error = ?e, "failed to classify event");
                }
            }
        }
    }

    /// Every tenant this event references through a p-tag, at most once.
    fn matching_tenants(&self, event: &NostrEvent) -> Vec<(i64, String)> {
        let mut seen = HashSet::new();
        event
            .p_tags()
            .into_iter()
            .filter(|p| seen.insert(p.to_string()))
            .filter_map(|p| self.registry.lookup(p).map(|id| (id, p.to_string())))
            .collect()
    }

    /// Classify the event for one tenant. `Ok(None)` means the event is
    /// deliberately ignored for this tenant (self-authored note, known
    /// follower re-announcing, unsupported kind).
    async fn build_event(
        &self,
        event: &NostrEvent,
        tenant_id: i64,
        tenant_pubkey: &str,
    ) -> anyhow::Result<Option<NewEvent>> {
        match event.kind {
            KIND_TEXT_NOTE => {
                if event.pubkey == tenant_pubkey {
                    return Ok(None);
                }
                // A note replying to one of the tenant's stored posts is a
                // reply; otherwise it is a plain mention.
                let mut target = None;
                for note_id in event.e_tags() {
                    if self.activity.find_post(tenant_id, note_id).await?.is_some() {
                        target = Some(note_id.to_string());
                        break;
                    }
                }
                let kind = if target.is_some() {
                    EventKind::Reply
                } else {
                    EventKind::Mention
                };
                Ok(Some(NewEvent {
                    tenant_id,
                    event_id: event.id.clone(),
                    kind,
                    author_pubkey: event.pubkey.clone(),
                    content: event.content.clone(),
                    metadata: json!({}),
                    created_at: event.created_at,
                    target_note: target,
                    zap_sats: 0,
                }))
            }
            KIND_CONTACT_LIST => {
                // A tenant's own contact list is the scanner's business.
                if self.registry.lookup(&event.pubkey).is_some() {
                    return Ok(None);
                }
                if self.activity.is_follower(tenant_id, &event.pubkey).await? {
                    return Ok(None);
                }
                Ok(Some(NewEvent {
                    tenant_id,
                    event_id: event.id.clone(),
                    kind: EventKind::Follow,
                    author_pubkey: event.pubkey.clone(),
                    content: String::new(),
                    metadata: json!({}),
                    created_at: event.created_at,
                    target_note: None,
                    zap_sats: 0,
                }))
            }
            KIND_ZAP_RECEIPT => {
                let amount = event
                    .first_tag_value("bolt11")
                    .and_then(invoice_amount_sats);
                let metadata = json!({
                    "amount_sats": amount.unwrap_or(0),
                    "unparsable_amount": amount.is_none(),
                });
                let target = match event.e_tags().last() {
                    Some(note_id) => self
                        .activity
                        .find_post(tenant_id, note_id)
                        .await?
                        .map(|p| p.note_id),
                    None => None,
                };
                Ok(Some(NewEvent {
                    tenant_id,
                    event_id: event.id.clone(),
                    kind: EventKind::Zap,
                    author_pubkey: event.pubkey.clone(),
                    content: String::new(),
                    metadata,
                    created_at: event.created_at,
                    target_note: target,
                    zap_sats: amount.unwrap_or(0) as i64,
                }))
            }
            KIND_REACTION | KIND_REPOST => {
                // The last e-tag is the engaged note; a missing post row is
                // created as a stub by the store.
                let Some(note_id) = event.e_tags().last().map(|s| s.to_string()) else {
                    return Ok(None);
                };
                let kind = if event.kind == KIND_REACTION {
                    EventKind::Reaction
                } else {
                    EventKind::Repost
                };
                Ok(Some(NewEvent {
                    tenant_id,
                    event_id: event.id.clone(),
                    kind,
                    author_pubkey: event.pubkey.clone(),
                    content: event.content.clone(),
                    metadata: json!({}),
                    created_at: event.created_at,
                    target_note: Some(note_id),
                    zap_sats: 0,
                }))
            }
            other => {
                debug!(kind = other, event_id = %event.id, "unsupported kind dropped");
                Ok(None)
            }
        }
    }
}

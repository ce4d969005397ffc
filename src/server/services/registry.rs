use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::relay::RelayPool;
use crate::server::services::tenant_store::TenantStore;

#[derive(Default)]
struct Snapshot {
    by_pubkey: HashMap<String, i64>,
}

/// Read-mostly reverse index from protocol pubkey to tenant id. Reloaded in
/// full from the store; readers clone an `Arc` and never block the reload.
pub struct TenantRegistry {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    pub fn lookup(&self, pubkey: &str) -> Option<i64> {
        let snapshot = self.snapshot.read().expect("registry lock").clone();
        snapshot.by_pubkey.get(pubkey).copied()
    }

    pub fn all_pubkeys(&self) -> Vec<String> {
        let snapshot = self.snapshot.read().expect("registry lock").clone();
        let mut pubkeys: Vec<String> = snapshot.by_pubkey.keys().cloned().collect();
        pubkeys.sort();
        pubkeys
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().expect("registry lock").by_pubkey.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Swap in a fresh mapping; returns whether the pubkey set changed.
    pub fn replace(&self, by_pubkey: HashMap<String, i64>) -> bool {
        let mut guard = self.snapshot.write().expect("registry lock");
        let changed = guard.by_pubkey != by_pubkey;
        if changed {
            *guard = Arc::new(Snapshot { by_pubkey });
        }
        changed
    }

    /// Full reload from the store. A failed reload keeps the last snapshot
    /// in force and reports `Ok(false)` upstream via the caller's logging.
    pub async fn reload_from(&self, tenants: &TenantStore) -> anyhow::Result<bool> {
        let all = tenants.all().await?;
        let by_pubkey = all
            .into_iter()
            .map(|t| (t.pubkey, t.id))
            .collect::<HashMap<_, _>>();
        Ok(self.replace(by_pubkey))
    }
}

impl Default for TenantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic reload role. On every change the relay pool gets the new pubkey
/// set so it can reissue its subscriptions.
pub fn spawn_registry_reloader(
    registry: Arc<TenantRegistry>,
    tenants: TenantStore,
    relay_pool: RelayPool,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    info!("registry reloader shutting down");
                    return;
                }
            }
            match registry.reload_from(&tenants).await {
                Ok(true) => {
                    let pubkeys = registry.all_pubkeys();
                    info!(tenants = pubkeys.len(), "tenant set changed, reissuing subscriptions");
                    relay_pool.update_tenants(&pubkeys);
                }
                Ok(false) => {}
                Err(e) => {
                    // Non-fatal: the last good snapshot stays in force.
                    warn!(error = %e, "tenant registry reload failed");
                }
            }
        }
    })
}

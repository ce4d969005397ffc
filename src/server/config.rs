use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::warn;

use crate::relay::{RelayPool, RelayPoolConfig};
use crate::server::models::Tier;
use crate::server::services::activity_store::ActivityStore;
use crate::server::services::aggregator::TimingAggregator;
use crate::server::services::event_store::EventStore;
use crate::server::services::insights::InsightService;
use crate::server::services::registry::TenantRegistry;
use crate::server::services::scanner::{NetworkScanner, ScannerConfig};
use crate::server::services::tenant_store::TenantStore;

const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
];

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub relay_urls: Vec<String>,
    pub webhook_timeout: Duration,
    pub webhook_retries: u32,
    pub rate_limit_free: i64,
    pub rate_limit_premium: i64,
    pub registry_reload_interval: Duration,
    pub relay_query_timeout: Duration,
    pub scanner_max_followers: usize,
    pub scanner_max_following: usize,
    pub aggregation_interval: Duration,
    pub insight_ttl_raw: Duration,
    pub insight_ttl_recommendation: Duration,
    pub insight_ttl_default: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:deepclaw.db".into(),
            port: 3000,
            relay_urls: DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect(),
            webhook_timeout: Duration::from_millis(5000),
            webhook_retries: 3,
            rate_limit_free: 100,
            rate_limit_premium: 1000,
            registry_reload_interval: Duration::from_secs(300),
            relay_query_timeout: Duration::from_secs(10),
            scanner_max_followers: 300,
            scanner_max_following: 100,
            aggregation_interval: Duration::from_secs(3600),
            insight_ttl_raw: Duration::from_secs(3600),
            insight_ttl_recommendation: Duration::from_secs(4 * 3600),
            insight_ttl_default: Duration::from_secs(24 * 3600),
        }
    }
}

impl AppConfig {
    /// Environment-driven configuration. Anything unparsable falls back to
    /// the default; only the database location has no sensible fallback in
    /// production and that is a deployment concern, not a startup panic.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| defaults.database_url.clone()),
            port: env_parse("PORT", defaults.port),
            relay_urls: std::env::var("RELAY_URLS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(defaults.relay_urls),
            webhook_timeout: Duration::from_millis(env_parse(
                "WEBHOOK_TIMEOUT_MS",
                defaults.webhook_timeout.as_millis() as u64,
            )),
            webhook_retries: env_parse("WEBHOOK_RETRIES", defaults.webhook_retries),
            rate_limit_free: env_parse("RATE_LIMIT_FREE", defaults.rate_limit_free),
            rate_limit_premium: env_parse("RATE_LIMIT_PREMIUM", defaults.rate_limit_premium),
            registry_reload_interval: Duration::from_secs(env_parse(
                "REGISTRY_RELOAD_SECS",
                defaults.registry_reload_interval.as_secs(),
            )),
            relay_query_timeout: Duration::from_secs(env_parse(
                "RELAY_QUERY_TIMEOUT_SECS",
                defaults.relay_query_timeout.as_secs(),
            )),
            scanner_max_followers: env_parse(
                "SCANNER_MAX_FOLLOWERS",
                defaults.scanner_max_followers,
            ),
            scanner_max_following: env_parse(
                "SCANNER_MAX_FOLLOWING",
                defaults.scanner_max_following,
            ),
            aggregation_interval: Duration::from_secs(env_parse(
                "AGGREGATION_INTERVAL_SECS",
                defaults.aggregation_interval.as_secs(),
            )),
            insight_ttl_raw: defaults.insight_ttl_raw,
            insight_ttl_recommendation: defaults.insight_ttl_recommendation,
            insight_ttl_default: defaults.insight_ttl_default,
        }
    }

    pub fn rate_limit_for(&self, tier: Tier) -> i64 {
        match tier {
            Tier::Free => self.rate_limit_free,
            Tier::Premium => self.rate_limit_premium,
        }
    }

    pub fn relay_pool_config(&self) -> RelayPoolConfig {
        RelayPoolConfig {
            relay_urls: self.relay_urls.clone(),
            ..RelayPoolConfig::default()
        }
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            relay_urls: self.relay_urls.clone(),
            query_timeout: self.relay_query_timeout,
            max_followers: self.scanner_max_followers,
            max_following: self.scanner_max_following,
        }
    }
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "unparsable configuration value, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Everything handlers and background roles need, cheap to clone. Stores
/// share the underlying connection pool.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pool: SqlitePool,
    pub tenants: TenantStore,
    pub events: EventStore,
    pub activity: ActivityStore,
    pub insights: InsightService,
    pub registry: Arc<TenantRegistry>,
    pub relay_pool: RelayPool,
    pub scanner: Arc<NetworkScanner>,
    pub aggregator: TimingAggregator,
    pub webhook_wake: mpsc::Sender<i64>,
}

impl AppState {
    /// Wires stores and services around one pool. The returned receiver is
    /// the webhook dispatcher's fast-path wakeup; the sender half lives in
    /// the state so the event router can nudge deliveries.
    pub fn new(config: AppConfig, pool: SqlitePool) -> (Self, mpsc::Receiver<i64>) {
        let config = Arc::new(config);
        let (webhook_wake, webhook_rx) = mpsc::channel(1024);

        let tenants = TenantStore::new(pool.clone());
        let events = EventStore::new(pool.clone());
        let activity = ActivityStore::new(pool.clone());
        let aggregator = TimingAggregator::new(activity.clone());
        let insights = InsightService::new(
            pool.clone(),
            activity.clone(),
            events.clone(),
            aggregator.clone(),
            Arc::clone(&config),
        );
        let relay_pool = RelayPool::new(config.relay_pool_config());
        let scanner = Arc::new(NetworkScanner::new(
            config.scanner_config(),
            activity.clone(),
            aggregator.clone(),
            insights.clone(),
        ));

        let state = Self {
            config,
            pool,
            tenants,
            events,
            activity,
            insights,
            registry: Arc::new(TenantRegistry::new()),
            relay_pool,
            scanner,
            aggregator,
            webhook_wake,
        };
        (state, webhook_rx)
    }
}

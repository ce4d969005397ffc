use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::relay::event::{KIND_CONTACT_LIST, KIND_TEXT_NOTE};
use crate::relay::query::fetch_from_relays;
use crate::relay::{Filter, NostrEvent};
use crate::server::models::{ActivityRole, Tenant};
use crate::server::services::activity_store::{gmt_hour, ActivityStore};
use crate::server::services::aggregator::{
    peak_hours, zone_of_participation, TimingAggregator, Zone,
};
use crate::server::services::insights::InsightService;

const AUTHOR_CHUNK: usize = 20;
const POSTS_PER_CHUNK: u32 = 500;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("no contact list")]
    NoContactList,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub relay_urls: Vec<String>,
    pub query_timeout: Duration,
    pub max_followers: usize,
    pub max_following: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub following_scanned: usize,
    pub followers_scanned: usize,
    pub posts_analyzed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuickScanDistribution {
    pub count: usize,
    pub hourly_distribution: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuickScanReport {
    pub pubkey: String,
    pub period_days: i64,
    pub posts_analyzed: i64,
    pub following: QuickScanDistribution,
    pub zone: Option<Zone>,
    pub peak_hours: Vec<u8>,
}

/// On-demand relay crawler. The full scan persists PostActivity and
/// refreshes the aggregates; the quick scan only assembles a transient
/// histogram for the response.
pub struct NetworkScanner {
    config: ScannerConfig,
    activity: ActivityStore,
    aggregator: TimingAggregator,
    insights: InsightService,
}

impl NetworkScanner {
    pub fn new(
        config: ScannerConfig,
        activity: ActivityStore,
        aggregator: TimingAggregator,
        insights: InsightService,
    ) -> Self {
        Self {
            config,
            activity,
            aggregator,
            insights,
        }
    }

    pub async fn full_scan(
        &self,
        tenant: &Tenant,
        period_days: i64,
    ) -> Result<ScanReport, ScanError> {
        let since = chrono::Utc::now().timestamp() - period_days * 86_400;

        let following = self.fetch_following(&tenant.pubkey).await?;
        let followers = self.fetch_followers(&tenant.pubkey).await;
        self.activity
            .record_following(tenant.id, &following)
            .await
            .map_err(ScanError::Other)?;

        let following_set: HashSet<&String> = following.iter().collect();
        let mut posts_analyzed = 0usize;

        // The tenant's own notes feed the posts table so engagement events
        // have something to attach to.
        let own_posts = self
            .fetch_posts(std::slice::from_ref(&tenant.pubkey), since)
            .await;
        for post in &own_posts {
            self.activity
                .upsert_post(
                    tenant.id,
                    &post.id,
                    &post.content,
                    first_image_url(post).as_deref(),
                    post.created_at,
                )
                .await
                .map_err(ScanError::Other)?;
            self.activity
                .insert_post_activity(
                    tenant.id,
                    &post.pubkey,
                    ActivityRole::Own,
                    &post.id,
                    post.created_at,
                )
                .await
                .map_err(ScanError::Other)?;
            posts_analyzed += 1;
        }

        let mut network_authors: Vec<String> = Vec::new();
        network_authors.extend(following.iter().cloned());
        network_authors.extend(
            followers
                .iter()
                .filter(|f| !following_set.contains(f))
                .cloned(),
        );

        for chunk in network_authors.chunks(AUTHOR_CHUNK) {
            let posts = self.fetch_posts(chunk, since).await;
            for post in posts {
                let role = if following_set.contains(&post.pubkey) {
                    ActivityRole::Following
                } else {
                    ActivityRole::Follower
                };
                self.activity
                    .insert_post_activity(tenant.id, &post.pubkey, role, &post.id, post.created_at)
                    .await
                    .map_err(ScanError::Other)?;
                posts_analyzed += 1;
            }
        }

        self.aggregator
            .aggregate_tenant(tenant.id, period_days)
            .await
            .map_err(ScanError::Other)?;
        self.insights
            .invalidate_tenant(tenant.id)
            .await
            .map_err(ScanError::Other)?;

        info!(
            tenant_id = tenant.id,
            following = following.len(),
            followers = followers.len(),
            posts = posts_analyzed,
            "network scan complete"
        );

        Ok(ScanReport {
            following_scanned: following.len(),
            followers_scanned: followers.len(),
            posts_analyzed,
        })
    }

    /// Same fetch logic as the full scan but nothing is written; the
    /// histogram lives only in the response.
    pub async fn quick_scan(
        &self,
        pubkey: &str,
        period_days: i64,
    ) -> Result<QuickScanReport, ScanError> {
        let since = chrono::Utc::now().timestamp() - period_days * 86_400;
        let following = self.fetch_following(pubkey).await?;

        let mut histogram = [0i64; 24];
        let mut posts_analyzed = 0i64;
        for chunk in following.chunks(AUTHOR_CHUNK) {
            let posts = self.fetch_posts(chunk, since).await;
            for post in posts {
                histogram[gmt_hour(post.created_at) as usize] += 1;
                posts_analyzed += 1;
            }
        }

        Ok(QuickScanReport {
            pubkey: pubkey.to_string(),
            period_days,
            posts_analyzed,
            following: QuickScanDistribution {
                count: following.len(),
                hourly_distribution: histogram.to_vec(),
            },
            zone: zone_of_participation(&histogram),
            peak_hours: peak_hours(&histogram),
        })
    }

    /// Latest contact list by the pubkey; its p-tags are who they follow.
    async fn fetch_following(&self, pubkey: &str) -> Result<Vec<String>, ScanError> {
        let filter = Filter::new()
            .kinds([KIND_CONTACT_LIST])
            .authors([pubkey.to_string()])
            .limit(1);
        let events = fetch_from_relays(
            &self.config.relay_urls,
            std::slice::from_ref(&filter),
            self.config.query_timeout,
        )
        .await;

        let latest = events
            .into_iter()
            .filter(|e| e.pubkey == pubkey)
            .max_by_key(|e| e.created_at)
            .ok_or(ScanError::NoContactList)?;

        let mut seen = HashSet::new();
        let following: Vec<String> = latest
            .p_tags()
            .into_iter()
            .filter(|p| *p != pubkey && seen.insert(p.to_string()))
            .map(String::from)
            .take(self.config.max_following)
            .collect();
        debug!(pubkey, following = following.len(), "resolved contact list");
        Ok(following)
    }

    /// Contact lists that tag the pubkey; their authors are followers.
    async fn fetch_followers(&self, pubkey: &str) -> Vec<String> {
        let filter = Filter::new()
            .kinds([KIND_CONTACT_LIST])
            .p_tags([pubkey.to_string()])
            .limit(self.config.max_followers as u32);
        let events = fetch_from_relays(
            &self.config.relay_urls,
            std::slice::from_ref(&filter),
            self.config.query_timeout,
        )
        .await;

        let mut seen = HashSet::new();
        events
            .into_iter()
            .map(|e| e.pubkey)
            .filter(|p| p != pubkey && seen.insert(p.clone()))
            .take(self.config.max_followers)
            .collect()
    }

    async fn fetch_posts(&self, authors: &[String], since: i64) -> Vec<NostrEvent> {
        let filter = Filter::new()
            .kinds([KIND_TEXT_NOTE])
            .authors(authors.to_vec())
            .since(since)
            .limit(POSTS_PER_CHUNK);
        fetch_from_relays(
            &self.config.relay_urls,
            std::slice::from_ref(&filter),
            self.config.query_timeout,
        )
        .await
        .into_iter()
        .filter(|e| e.kind == KIND_TEXT_NOTE && e.created_at >= since)
        .collect()
    }
}

fn first_image_url(event: &NostrEvent) -> Option<String> {
    event
        .content
        .split_whitespace()
        .find(|w| {
            let lower = w.to_ascii_lowercase();
            lower.starts_with("http")
                && (lower.ends_with(".png")
                    || lower.ends_with(".jpg")
                    || lower.ends_with(".jpeg")
                    || lower.ends_with(".gif")
                    || lower.ends_with(".webp"))
        })
        .map(String::from)
}

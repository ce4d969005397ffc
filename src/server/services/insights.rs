use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::debug;

use crate::server::config::AppConfig;
use crate::server::models::{EventKind, NetworkActivityKind};
use crate::server::services::activity_store::{window_date_today, ActivityStore};
use crate::server::services::aggregator::{peak_hours, zone_of_participation, TimingAggregator};
use crate::server::services::event_store::EventStore;

#[derive(Debug, Clone)]
pub struct CachedInsight {
    pub payload: Value,
    pub cached: bool,
    pub calculated_at: i64,
}

/// Read-through cache over the analytics computations, keyed on
/// (tenant, insight kind, period). Fresh rows short-circuit; stale rows are
/// recomputed and overwritten in place.
#[derive(Clone)]
pub struct InsightService {
    pool: SqlitePool,
    activity: ActivityStore,
    events: EventStore,
    aggregator: TimingAggregator,
    config: Arc<AppConfig>,
}

impl InsightService {
    pub fn new(
        pool: SqlitePool,
        activity: ActivityStore,
        events: EventStore,
        aggregator: TimingAggregator,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            pool,
            activity,
            events,
            aggregator,
            config,
        }
    }

    pub fn ttl_raw(&self) -> Duration {
        self.config.insight_ttl_raw
    }

    pub fn ttl_recommendation(&self) -> Duration {
        self.config.insight_ttl_recommendation
    }

    pub fn ttl_default(&self) -> Duration {
        self.config.insight_ttl_default
    }

    pub async fn get_or_compute<F, Fut>(
        &self,
        tenant_id: i64,
        kind: &str,
        period: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<CachedInsight>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Value>>,
    {
        let now = chrono::Utc::now().timestamp();

        let row = sqlx::query_as::<_, (String, i64, i64)>(
            r#"
            SELECT payload, calculated_at, expires_at FROM insights
            WHERE tenant_id = ?1 AND kind = ?2 AND period = ?3
            "#,
        )
        .bind(tenant_id)
        .bind(kind)
        .bind(period)
        .fetch_optional(&self.pool)
        .await
        .context("failed to read insight cache")?;

        if let Some((payload, calculated_at, expires_at)) = row {
            if expires_at > now {
                if let Ok(value) = serde_json::from_str(&payload) {
                    debug!(tenant_id, kind, period, "insight cache hit");
                    return Ok(CachedInsight {
                        payload: value,
                        cached: true,
                        calculated_at,
                    });
                }
            }
        }

        let value = compute().await?;
        let expires_at = now + ttl.as_secs() as i64;
        sqlx::query(
            r#"
            INSERT INTO insights (tenant_id, kind, period, payload, calculated_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (tenant_id, kind, period) DO UPDATE SET
                payload = excluded.payload,
                calculated_at = excluded.calculated_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(tenant_id)
        .bind(kind)
        .bind(period)
        .bind(value.to_string())
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .context("failed to upsert insight")?;

        Ok(CachedInsight {
            payload: value,
            cached: false,
            calculated_at: now,
        })
    }

    pub async fn invalidate_tenant(&self, tenant_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM insights WHERE tenant_id = ?1")
            .bind(tenant_id)
            .execute(&self.pool)
            .await
            .context("failed to invalidate insights")?;
        Ok(())
    }

    /// Hourly distribution plus derived zone and peaks for one histogram
    /// family. Aggregates first so the read is never a day stale.
    pub async fn network_activity_payload(
        &self,
        tenant_id: i64,
        kind: NetworkActivityKind,
        period_days: i64,
    ) -> Result<Value> {
        self.aggregator.aggregate_tenant(tenant_id, period_days).await?;
        let histogram = self
            .activity
            .histogram(tenant_id, kind, &window_date_today())
            .await?;
        Ok(json!({
            "type": kind.as_str(),
            "period_days": period_days,
            "hourly_distribution": histogram.to_vec(),
            "total": histogram.iter().sum::<i64>(),
            "zone_of_participation": zone_of_participation(&histogram),
            "peak_hours": peak_hours(&histogram),
        }))
    }

    pub async fn best_posting_times_payload(
        &self,
        tenant_id: i64,
        period_days: i64,
    ) -> Result<Value> {
        let times = self.aggregator.best_posting_times(tenant_id, period_days).await?;
        Ok(json!({
            "period_days": period_days,
            "recommendations": times.slots,
            "confidence": times.confidence,
            "data_points": times.data_points,
        }))
    }

    pub async fn top_engagers_payload(
        &self,
        tenant_id: i64,
        period_days: i64,
        min_interactions: i64,
        limit: i64,
    ) -> Result<Value> {
        let since = chrono::Utc::now().timestamp() - period_days * 86_400;
        let engagers = self
            .activity
            .top_engagers(tenant_id, Some(since), min_interactions, limit)
            .await?;
        Ok(json!({
            "period_days": period_days,
            "min_interactions": min_interactions,
            "engagers": engagers,
        }))
    }

    /// Prioritized action list from unacknowledged replies and new
    /// followers. Not cached: acknowledging an event must take effect on
    /// the next read.
    pub async fn should_engage_payload(&self, tenant_id: i64, limit: i64) -> Result<Value> {
        let now = chrono::Utc::now().timestamp();
        let replies = self
            .events
            .unacknowledged(tenant_id, None, Some(&[EventKind::Reply, EventKind::Mention]), limit)
            .await?;
        let follows = self
            .events
            .unacknowledged(tenant_id, None, Some(&[EventKind::Follow]), limit)
            .await?;

        let mut actions: Vec<Value> = Vec::new();
        for event in &replies {
            let age_hours = (now - event.created_at).max(0) / 3600;
            // Replies decay but outrank follow-backs for the first two days.
            let priority = (90 - age_hours).max(40);
            actions.push(json!({
                "action": "reply",
                "priority": priority,
                "event_id": event.event_id,
                "author": event.author_pubkey,
                "kind": event.kind,
                "content": event.content,
                "created_at": event.created_at,
            }));
        }
        for event in &follows {
            let age_hours = (now - event.created_at).max(0) / 3600;
            let priority = (60 - age_hours).max(20);
            actions.push(json!({
                "action": "follow_back",
                "priority": priority,
                "event_id": event.event_id,
                "author": event.author_pubkey,
                "kind": event.kind,
                "created_at": event.created_at,
            }));
        }

        actions.sort_by(|a, b| {
            let pa = a["priority"].as_i64().unwrap_or(0);
            let pb = b["priority"].as_i64().unwrap_or(0);
            pb.cmp(&pa)
                .then(a["created_at"].as_i64().cmp(&b["created_at"].as_i64()))
        });
        actions.truncate(limit as usize);

        Ok(json!({ "actions": actions }))
    }

    /// Combined timing / content-mix / posting-frequency guidance.
    pub async fn posting_strategy_payload(
        &self,
        tenant_id: i64,
        period_days: i64,
        include: &[&str],
    ) -> Result<Value> {
        let mut strategy = serde_json::Map::new();

        if include.contains(&"timing") {
            let times = self.aggregator.best_posting_times(tenant_id, period_days).await?;
            let top: Vec<_> = times.slots.iter().take(3).collect();
            strategy.insert(
                "timing".into(),
                json!({
                    "best_hours_gmt": top.iter().map(|s| s.hour).collect::<Vec<_>>(),
                    "confidence": times.confidence,
                }),
            );
        }

        if include.contains(&"content_mix") {
            let posts = self.activity.posts(tenant_id, 200, "recent").await?;
            let with_image = posts.iter().filter(|p| p.image_url.is_some()).count() as i64;
            let total = posts.len() as i64;
            let avg_image_engagement = average(
                posts
                    .iter()
                    .filter(|p| p.image_url.is_some())
                    .map(|p| p.engagement_total()),
            );
            let avg_text_engagement = average(
                posts
                    .iter()
                    .filter(|p| p.image_url.is_none())
                    .map(|p| p.engagement_total()),
            );
            let suggestion = if avg_image_engagement > avg_text_engagement {
                "posts with media outperform text; include an image where it fits"
            } else {
                "plain text notes are holding their own; lead with strong first lines"
            };
            strategy.insert(
                "content_mix".into(),
                json!({
                    "posts_sampled": total,
                    "with_image": with_image,
                    "avg_engagement_with_image": avg_image_engagement,
                    "avg_engagement_text_only": avg_text_engagement,
                    "suggestion": suggestion,
                }),
            );
        }

        if include.contains(&"frequency") {
            let since = chrono::Utc::now().timestamp() - period_days * 86_400;
            let posts = self.activity.posts_since(tenant_id, since).await?;
            let per_day = posts as f64 / period_days.max(1) as f64;
            let suggestion = if per_day < 1.0 {
                "post at least once a day to stay in your followers' feeds"
            } else if per_day > 10.0 {
                "volume is high; fewer, stronger notes may lift per-post reach"
            } else {
                "current cadence looks sustainable; keep it steady"
            };
            strategy.insert(
                "frequency".into(),
                json!({
                    "period_days": period_days,
                    "posts": posts,
                    "posts_per_day": (per_day * 100.0).round() / 100.0,
                    "suggestion": suggestion,
                }),
            );
        }

        Ok(Value::Object(strategy))
    }

    /// Engagers the tenant does not follow yet, ranked by interaction
    /// volume.
    pub async fn follow_suggestions_payload(
        &self,
        tenant_id: i64,
        limit: i64,
        exclude_followers: bool,
    ) -> Result<Value> {
        let engagers = self
            .activity
            .top_engagers(tenant_id, None, 1, limit * 4)
            .await?;
        let following: std::collections::HashSet<String> = self
            .activity
            .following_pubkeys(tenant_id)
            .await?
            .into_iter()
            .collect();

        let mut suggestions = Vec::new();
        for engager in engagers {
            if following.contains(&engager.pubkey) {
                continue;
            }
            if exclude_followers && self.activity.is_follower(tenant_id, &engager.pubkey).await? {
                continue;
            }
            let score = engager.interactions * 10 + engager.zaps * 5;
            suggestions.push(json!({
                "pubkey": engager.pubkey,
                "score": score,
                "interactions": engager.interactions,
                "zaps": engager.zaps,
                "reason": format!(
                    "interacted with you {} times in the observed window",
                    engager.interactions
                ),
            }));
            if suggestions.len() as i64 == limit {
                break;
            }
        }

        Ok(json!({ "suggestions": suggestions }))
    }
}

fn average(values: impl Iterator<Item = i64>) -> f64 {
    let collected: Vec<i64> = values.collect();
    if collected.is_empty() {
        return 0.0;
    }
    let sum: i64 = collected.iter().sum();
    (sum as f64 / collected.len() as f64 * 100.0).round() / 100.0
}

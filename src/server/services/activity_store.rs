use anyhow::{Context, Result};
use chrono::{TimeZone, Timelike, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::server::models::{ActivityRole, Engager, NetworkActivityKind, Post};

/// Hour-of-day in GMT for a UNIX timestamp.
pub fn gmt_hour(ts: i64) -> i64 {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.hour() as i64)
        .unwrap_or(0)
}

/// Aggregation window key; histogram rows are rewritten under today's date
/// on every pass.
pub fn window_date_today() -> String {
    Utc::now().date_naive().to_string()
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SummaryCounters {
    pub followers: i64,
    pub following: i64,
    pub posts: i64,
    pub reactions: i64,
    pub replies: i64,
    pub reposts: i64,
    pub zap_count: i64,
    pub zap_total_sats: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FollowerGain {
    pub date: String,
    pub count: i64,
}

#[derive(Clone)]
pub struct ActivityStore {
    pool: SqlitePool,
}

impl ActivityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Idempotent by (tenant, note); repeated scans of the same window are
    /// safe to resume. Returns `true` when the row is new.
    pub async fn insert_post_activity(
        &self,
        tenant_id: i64,
        author_pubkey: &str,
        role: ActivityRole,
        note_id: &str,
        posted_at: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO post_activity
                (tenant_id, author_pubkey, author_role, note_id, posted_at, hour)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(tenant_id)
        .bind(author_pubkey)
        .bind(role.as_str())
        .bind(note_id)
        .bind(posted_at)
        .bind(gmt_hour(posted_at))
        .execute(&self.pool)
        .await
        .context("failed to insert post activity")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn hourly_post_activity(
        &self,
        tenant_id: i64,
        role: ActivityRole,
        since: i64,
    ) -> Result<[i64; 24]> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT hour, COUNT(*) FROM post_activity
            WHERE tenant_id = ?1 AND author_role = ?2 AND posted_at >= ?3
            GROUP BY hour
            "#,
        )
        .bind(tenant_id)
        .bind(role.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("failed to aggregate post activity")?;
        Ok(to_histogram(rows))
    }

    /// Engagement histogram straight from event rows.
    pub async fn hourly_engagement(&self, tenant_id: i64, since: i64) -> Result<[i64; 24]> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT CAST(strftime('%H', created_at, 'unixepoch') AS INTEGER) AS hour, COUNT(*)
            FROM events
            WHERE tenant_id = ?1 AND created_at >= ?2
            GROUP BY hour
            "#,
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("failed to aggregate engagement")?;
        Ok(to_histogram(rows))
    }

    pub async fn upsert_network_activity(
        &self,
        tenant_id: i64,
        kind: NetworkActivityKind,
        hour: i64,
        count: i64,
        window_date: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO network_activity (tenant_id, kind, hour, count, window_date)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (tenant_id, kind, hour, window_date)
            DO UPDATE SET count = excluded.count
            "#,
        )
        .bind(tenant_id)
        .bind(kind.as_str())
        .bind(hour)
        .bind(count)
        .bind(window_date)
        .execute(&self.pool)
        .await
        .context("failed to upsert network activity")?;
        Ok(())
    }

    pub async fn histogram(
        &self,
        tenant_id: i64,
        kind: NetworkActivityKind,
        window_date: &str,
    ) -> Result<[i64; 24]> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT hour, count FROM network_activity
            WHERE tenant_id = ?1 AND kind = ?2 AND window_date = ?3
            "#,
        )
        .bind(tenant_id)
        .bind(kind.as_str())
        .bind(window_date)
        .fetch_all(&self.pool)
        .await
        .context("failed to read histogram")?;
        Ok(to_histogram(rows))
    }

    pub async fn is_follower(&self, tenant_id: i64, pubkey: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM followers WHERE tenant_id = ?1 AND pubkey = ?2",
        )
        .bind(tenant_id)
        .bind(pubkey)
        .fetch_one(&self.pool)
        .await
        .context("failed to check follower")?;
        Ok(count > 0)
    }

    pub async fn record_following(&self, tenant_id: i64, pubkeys: &[String]) -> Result<()> {
        let now = Utc::now().timestamp();
        for pubkey in pubkeys {
            sqlx::query(
                r#"
                INSERT INTO following (tenant_id, pubkey, updated_at) VALUES (?1, ?2, ?3)
                ON CONFLICT (tenant_id, pubkey) DO UPDATE SET updated_at = excluded.updated_at
                "#,
            )
            .bind(tenant_id)
            .bind(pubkey)
            .bind(now)
            .execute(&self.pool)
            .await
            .context("failed to record following")?;
        }
        Ok(())
    }

    pub async fn following_pubkeys(&self, tenant_id: i64) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>("SELECT pubkey FROM following WHERE tenant_id = ?1")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .context("failed to list following")
    }

    pub async fn follower_gains(&self, tenant_id: i64, since: i64) -> Result<Vec<FollowerGain>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT date(followed_at, 'unixepoch') AS day, COUNT(*)
            FROM followers
            WHERE tenant_id = ?1 AND followed_at >= ?2
            GROUP BY day
            ORDER BY day
            "#,
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("failed to read follower gains")?;
        Ok(rows
            .into_iter()
            .map(|(date, count)| FollowerGain { date, count })
            .collect())
    }

    pub async fn followers_since(&self, tenant_id: i64, since: i64) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM followers WHERE tenant_id = ?1 AND followed_at >= ?2",
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("failed to count recent followers")
    }

    /// The tenant's own note, inserted or refreshed from a scan. Existing
    /// counters are preserved; only content fields are updated.
    pub async fn upsert_post(
        &self,
        tenant_id: i64,
        note_id: &str,
        content: &str,
        image_url: Option<&str>,
        posted_at: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posts (tenant_id, note_id, content, image_url, posted_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (tenant_id, note_id) DO UPDATE SET
                content = excluded.content,
                image_url = COALESCE(excluded.image_url, posts.image_url),
                posted_at = excluded.posted_at
            "#,
        )
        .bind(tenant_id)
        .bind(note_id)
        .bind(content)
        .bind(image_url)
        .bind(posted_at)
        .execute(&self.pool)
        .await
        .context("failed to upsert post")?;
        Ok(())
    }

    pub async fn posts(&self, tenant_id: i64, limit: i64, sort: &str) -> Result<Vec<Post>> {
        let order = match sort {
            "engagement" => "reactions + replies + reposts + zap_count DESC, posted_at DESC",
            _ => "posted_at DESC",
        };
        let query = format!(
            "SELECT * FROM posts WHERE tenant_id = ?1 ORDER BY {order} LIMIT ?2"
        );
        sqlx::query_as::<_, Post>(&query)
            .bind(tenant_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("failed to list posts")
    }

    pub async fn find_post(&self, tenant_id: i64, note_id: &str) -> Result<Option<Post>> {
        sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE tenant_id = ?1 AND note_id = ?2")
            .bind(tenant_id)
            .bind(note_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch post")
    }

    pub async fn posts_since(&self, tenant_id: i64, since: i64) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM posts WHERE tenant_id = ?1 AND posted_at >= ?2",
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("failed to count posts")
    }

    pub async fn summary(&self, tenant_id: i64) -> Result<SummaryCounters> {
        let (followers, following) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM followers WHERE tenant_id = ?1),
                (SELECT COUNT(*) FROM following WHERE tenant_id = ?1)
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to count graph rows")?;

        let (posts, reactions, replies, reposts, zap_count, zap_total) =
            sqlx::query_as::<_, (i64, i64, i64, i64, i64, i64)>(
                r#"
                SELECT COUNT(*),
                       COALESCE(SUM(reactions), 0),
                       COALESCE(SUM(replies), 0),
                       COALESCE(SUM(reposts), 0),
                       COALESCE(SUM(zap_count), 0),
                       COALESCE(SUM(zap_total), 0)
                FROM posts WHERE tenant_id = ?1
                "#,
            )
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await
            .context("failed to sum post counters")?;

        Ok(SummaryCounters {
            followers,
            following,
            posts,
            reactions,
            replies,
            reposts,
            zap_count,
            zap_total_sats: zap_total,
        })
    }

    pub async fn top_engagers(
        &self,
        tenant_id: i64,
        since: Option<i64>,
        min_interactions: i64,
        limit: i64,
    ) -> Result<Vec<Engager>> {
        sqlx::query_as::<_, Engager>(
            r#"
            SELECT * FROM engagers
            WHERE tenant_id = ?1 AND interactions >= ?2 AND last_seen >= ?3
            ORDER BY interactions DESC, zap_total DESC, pubkey ASC
            LIMIT ?4
            "#,
        )
        .bind(tenant_id)
        .bind(min_interactions)
        .bind(since.unwrap_or(0))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to list top engagers")
    }
}

fn to_histogram(rows: Vec<(i64, i64)>) -> [i64; 24] {
    let mut histogram = [0i64; 24];
    for (hour, count) in rows {
        if (0..24).contains(&hour) {
            histogram[hour as usize] = count;
        }
    }
    histogram
}

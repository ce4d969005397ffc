use anyhow::{Context, Result};
use serde_json::json;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::server::models::{EventKind, NewEvent, StoredEvent};

/// Seven days; events older than this on first observation are historical
/// and analytics-only.
const WEBHOOK_FRESHNESS_SECS: i64 = 7 * 86_400;

#[derive(Debug, Clone, Copy)]
pub struct RecordOutcome {
    pub event_row_id: i64,
    pub webhook_log_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct EventCounts {
    pub mentions: i64,
    pub replies: i64,
    pub reactions: i64,
    pub reposts: i64,
    pub follows: i64,
    pub zaps: i64,
}

#[derive(Clone)]
pub struct EventStore {
    pool: SqlitePool,
}

impl EventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Idempotent insert keyed on (tenant, event id). On a fresh insert the
    /// post counters, the engager aggregate, the follower row and the
    /// webhook enqueue all commit atomically with the event, so exactly one
    /// webhook exists per unique observed event. Returns `None` when the
    /// row already existed; nothing is re-fired.
    pub async fn record(&self, new: &NewEvent) -> Result<Option<RecordOutcome>> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.context("failed to open transaction")?;

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO events
                (event_id, tenant_id, kind, author_pubkey, content, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&new.event_id)
        .bind(new.tenant_id)
        .bind(new.kind.as_str())
        .bind(&new.author_pubkey)
        .bind(&new.content)
        .bind(new.metadata.to_string())
        .bind(new.created_at)
        .execute(&mut *tx)
        .await
        .context("failed to insert event")?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Ok(None);
        }
        let event_row_id = inserted.last_insert_rowid();

        if let Some(note_id) = &new.target_note {
            bump_post_counters(&mut tx, new, note_id).await?;
        }

        if new.kind != EventKind::Follow {
            upsert_engager(&mut tx, new, now).await?;
        } else {
            sqlx::query(
                "INSERT OR IGNORE INTO followers (tenant_id, pubkey, followed_at) VALUES (?1, ?2, ?3)",
            )
            .bind(new.tenant_id)
            .bind(&new.author_pubkey)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("failed to insert follower")?;
        }

        let fresh = now - new.created_at <= WEBHOOK_FRESHNESS_SECS;
        let webhook_log_id = match new.kind.webhook_event_type() {
            Some(event_type) if fresh => {
                let payload = webhook_payload(new, event_type, now);
                let result = sqlx::query(
                    r#"
                    INSERT INTO webhook_log (tenant_id, event_id, event_type, payload, status, created_at)
                    VALUES (?1, ?2, ?3, ?4, 'pending', ?5)
                    "#,
                )
                .bind(new.tenant_id)
                .bind(&new.event_id)
                .bind(event_type)
                .bind(payload.to_string())
                .bind(now)
                .execute(&mut *tx)
                .await
                .context("failed to enqueue webhook")?;
                Some(result.last_insert_rowid())
            }
            _ => None,
        };

        tx.commit().await.context("failed to commit event")?;

        Ok(Some(RecordOutcome {
            event_row_id,
            webhook_log_id,
        }))
    }

    /// Marks the given event ids acknowledged; already-acknowledged ids are
    /// a no-op, so clients can retry safely. Returns (acknowledged now,
    /// still unacknowledged).
    pub async fn acknowledge(&self, tenant_id: i64, event_ids: &[String]) -> Result<(u64, i64)> {
        let acknowledged = if event_ids.is_empty() {
            0
        } else {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "UPDATE events SET acknowledged = 1 WHERE acknowledged = 0 AND tenant_id = ",
            );
            builder.push_bind(tenant_id);
            builder.push(" AND event_id IN (");
            let mut separated = builder.separated(", ");
            for id in event_ids {
                separated.push_bind(id);
            }
            separated.push_unseparated(")");
            builder
                .build()
                .execute(&self.pool)
                .await
                .context("failed to acknowledge events")?
                .rows_affected()
        };

        let remaining = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM events WHERE tenant_id = ?1 AND acknowledged = 0",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to count unacknowledged events")?;

        Ok((acknowledged, remaining))
    }

    pub async fn unacknowledged(
        &self,
        tenant_id: i64,
        since: Option<i64>,
        kinds: Option<&[EventKind]>,
        limit: i64,
    ) -> Result<Vec<StoredEvent>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM events WHERE acknowledged = 0 AND tenant_id = ");
        builder.push_bind(tenant_id);
        if let Some(since) = since {
            builder.push(" AND created_at >= ");
            builder.push_bind(since);
        }
        if let Some(kinds) = kinds {
            builder.push(" AND kind IN (");
            let mut separated = builder.separated(", ");
            for kind in kinds {
                separated.push_bind(kind.as_str());
            }
            separated.push_unseparated(")");
        }
        builder.push(" ORDER BY created_at ASC LIMIT ");
        builder.push_bind(limit);

        builder
            .build_query_as::<StoredEvent>()
            .fetch_all(&self.pool)
            .await
            .context("failed to list unacknowledged events")
    }

    /// Per-kind counts over a window, for daily summaries and strategy
    /// insights.
    pub async fn counts_since(&self, tenant_id: i64, since: i64) -> Result<EventCounts> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT kind, COUNT(*) FROM events
            WHERE tenant_id = ?1 AND created_at >= ?2
            GROUP BY kind
            "#,
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("failed to count events")?;

        let mut counts = EventCounts::default();
        for (kind, count) in rows {
            match kind.as_str() {
                "mention" => counts.mentions = count,
                "reply" => counts.replies = count,
                "reaction" => counts.reactions = count,
                "repost" => counts.reposts = count,
                "follow" => counts.follows = count,
                "zap" => counts.zaps = count,
                _ => {}
            }
        }
        Ok(counts)
    }

    pub async fn zap_total_since(&self, tenant_id: i64, since: i64) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(CAST(json_extract(metadata, '$.amount_sats') AS INTEGER)), 0)
            FROM events
            WHERE tenant_id = ?1 AND kind = 'zap' AND created_at >= ?2
            "#,
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("failed to sum zap amounts")
    }
}

async fn bump_post_counters(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    new: &NewEvent,
    note_id: &str,
) -> Result<()> {
    // Stub row for posts we have not seen yet so later aggregates never
    // need a backfill pass.
    sqlx::query(
        "INSERT OR IGNORE INTO posts (tenant_id, note_id, content, posted_at) VALUES (?1, ?2, '', ?3)",
    )
    .bind(new.tenant_id)
    .bind(note_id)
    .bind(new.created_at)
    .execute(&mut **tx)
    .await
    .context("failed to ensure post row")?;

    let update = match new.kind {
        EventKind::Reply => "UPDATE posts SET replies = replies + 1 WHERE tenant_id = ?1 AND note_id = ?2",
        EventKind::Reaction => {
            "UPDATE posts SET reactions = reactions + 1 WHERE tenant_id = ?1 AND note_id = ?2"
        }
        EventKind::Repost => "UPDATE posts SET reposts = reposts + 1 WHERE tenant_id = ?1 AND note_id = ?2",
        EventKind::Zap => {
            "UPDATE posts SET zap_count = zap_count + 1, zap_total = zap_total + ?3 WHERE tenant_id = ?1 AND note_id = ?2"
        }
        EventKind::Mention | EventKind::Follow => return Ok(()),
    };

    let mut query = sqlx::query(update).bind(new.tenant_id).bind(note_id);
    if new.kind == EventKind::Zap {
        query = query.bind(new.zap_sats);
    }
    query
        .execute(&mut **tx)
        .await
        .context("failed to bump post counters")?;
    Ok(())
}

async fn upsert_engager(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    new: &NewEvent,
    now: i64,
) -> Result<()> {
    let (mentions, replies, reactions, reposts, zaps) = match new.kind {
        EventKind::Mention => (1, 0, 0, 0, 0),
        EventKind::Reply => (0, 1, 0, 0, 0),
        EventKind::Reaction => (0, 0, 1, 0, 0),
        EventKind::Repost => (0, 0, 0, 1, 0),
        EventKind::Zap => (0, 0, 0, 0, 1),
        EventKind::Follow => (0, 0, 0, 0, 0),
    };

    sqlx::query(
        r#"
        INSERT INTO engagers
            (tenant_id, pubkey, interactions, mentions, replies, reactions, reposts, zaps, zap_total, first_seen, last_seen)
        VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
        ON CONFLICT (tenant_id, pubkey) DO UPDATE SET
            interactions = interactions + 1,
            mentions = mentions + ?3,
            replies = replies + ?4,
            reactions = reactions + ?5,
            reposts = reposts + ?6,
            zaps = zaps + ?7,
            zap_total = zap_total + ?8,
            last_seen = ?9
        "#,
    )
    .bind(new.tenant_id)
    .bind(&new.author_pubkey)
    .bind(mentions)
    .bind(replies)
    .bind(reactions)
    .bind(reposts)
    .bind(zaps)
    .bind(new.zap_sats)
    .bind(now)
    .execute(&mut **tx)
    .await
    .context("failed to upsert engager")?;
    Ok(())
}

fn webhook_payload(new: &NewEvent, event_type: &str, now: i64) -> serde_json::Value {
    let mut payload = json!({
        "event_type": event_type,
        "timestamp": now,
        "event_id": new.event_id,
        "author": new.author_pubkey,
        "created_at": new.created_at,
    });
    let object = payload.as_object_mut().expect("payload is an object");
    match new.kind {
        EventKind::Mention | EventKind::Reply => {
            object.insert("content".into(), json!(new.content));
            if let Some(note) = &new.target_note {
                object.insert("note_id".into(), json!(note));
            }
        }
        EventKind::Zap => {
            object.insert("amount_sats".into(), json!(new.zap_sats));
        }
        _ => {}
    }
    payload
}

mod common;

use common::{event_id, hex_pubkey, spawn_app};
use deepclaw::server::models::{EventKind, NewEvent};
use serde_json::json;

async fn seed_interaction(
    app: &common::TestApp,
    tenant_id: i64,
    id: u8,
    author: &str,
    kind: EventKind,
    zap_sats: i64,
) {
    app.state
        .events
        .record(&NewEvent {
            tenant_id,
            event_id: event_id(id),
            kind,
            author_pubkey: author.to_string(),
            content: "x".into(),
            metadata: json!({}),
            created_at: chrono::Utc::now().timestamp() - 60,
            target_note: None,
            zap_sats,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn top_engagers_ranks_by_interactions() {
    let app = spawn_app().await;
    let body = app
        .register_tenant(&hex_pubkey(0xb1), "https://example.com/hook")
        .await;
    let token = body["api_token"].as_str().unwrap();
    let tenant_id = body["tenant_id"].as_i64().unwrap();

    let heavy = hex_pubkey(0xc1);
    let light = hex_pubkey(0xc2);
    seed_interaction(&app, tenant_id, 0x01, &heavy, EventKind::Mention, 0).await;
    seed_interaction(&app, tenant_id, 0x02, &heavy, EventKind::Reply, 0).await;
    seed_interaction(&app, tenant_id, 0x03, &heavy, EventKind::Zap, 100).await;
    seed_interaction(&app, tenant_id, 0x04, &light, EventKind::Reaction, 0).await;

    let response = app.get("/insights/top-engagers?period=7d", token).await;
    assert_eq!(response.status(), 200);
    let payload: serde_json::Value = response.json().await.unwrap();
    let engagers = payload["engagers"].as_array().unwrap();
    assert_eq!(engagers.len(), 2);
    assert_eq!(engagers[0]["pubkey"], heavy);
    assert_eq!(engagers[0]["interactions"], 3);
    assert_eq!(engagers[0]["zap_total"], 100);
    assert_eq!(engagers[1]["pubkey"], light);

    // min_interactions filters the long tail.
    let response = app
        .get("/insights/top-engagers?min_interactions=2", token)
        .await;
    let payload: serde_json::Value = response.json().await.unwrap();
    assert_eq!(payload["engagers"].as_array().unwrap().len(), 1);

    // The /network alias serves the same leaderboard.
    let response = app.get("/network/top-engagers", token).await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn should_engage_prioritizes_replies_over_follows() {
    let app = spawn_app().await;
    let body = app
        .register_tenant(&hex_pubkey(0xb2), "https://example.com/hook")
        .await;
    let token = body["api_token"].as_str().unwrap();
    let tenant_id = body["tenant_id"].as_i64().unwrap();

    seed_interaction(&app, tenant_id, 0x11, &hex_pubkey(0xc3), EventKind::Follow, 0).await;
    seed_interaction(&app, tenant_id, 0x12, &hex_pubkey(0xc4), EventKind::Reply, 0).await;

    let response = app.get("/insights/should-engage", token).await;
    assert_eq!(response.status(), 200);
    let payload: serde_json::Value = response.json().await.unwrap();
    let actions = payload["actions"].as_array().unwrap();
    assert_eq!(actions.len(), 2);
    assert_eq!(actions[0]["action"], "reply");
    assert_eq!(actions[1]["action"], "follow_back");

    // Acknowledging the reply removes it from the next read.
    app.post_json(
        "/events/acknowledge",
        token,
        &json!({ "eventIds": [event_id(0x12)] }),
    )
    .await;
    let response = app.get("/insights/should-engage", token).await;
    let payload: serde_json::Value = response.json().await.unwrap();
    let actions = payload["actions"].as_array().unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0]["action"], "follow_back");
}

#[tokio::test]
async fn follow_suggestions_exclude_already_followed() {
    let app = spawn_app().await;
    let body = app
        .register_tenant(&hex_pubkey(0xb3), "https://example.com/hook")
        .await;
    let token = body["api_token"].as_str().unwrap();
    let tenant_id = body["tenant_id"].as_i64().unwrap();

    let known = hex_pubkey(0xc5);
    let fresh = hex_pubkey(0xc6);
    seed_interaction(&app, tenant_id, 0x21, &known, EventKind::Reply, 0).await;
    seed_interaction(&app, tenant_id, 0x22, &fresh, EventKind::Reply, 0).await;
    app.state
        .activity
        .record_following(tenant_id, &[known.clone()])
        .await
        .unwrap();

    let response = app.get("/network/follow-suggestions?limit=10", token).await;
    assert_eq!(response.status(), 200);
    let payload: serde_json::Value = response.json().await.unwrap();
    let suggestions = payload["suggestions"].as_array().unwrap();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0]["pubkey"], fresh);

    let response = app
        .get("/network/follow-suggestions?filters=bogus", token)
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn posting_strategy_sections_are_selectable() {
    let app = spawn_app().await;
    let body = app
        .register_tenant(&hex_pubkey(0xb4), "https://example.com/hook")
        .await;
    let token = body["api_token"].as_str().unwrap();
    let tenant_id = body["tenant_id"].as_i64().unwrap();

    let now = chrono::Utc::now().timestamp();
    app.state
        .activity
        .upsert_post(tenant_id, &event_id(0x31), "note", None, now - 3600)
        .await
        .unwrap();

    let response = app
        .get("/insights/posting-strategy?include=frequency", token)
        .await;
    assert_eq!(response.status(), 200);
    let payload: serde_json::Value = response.json().await.unwrap();
    assert!(payload.get("frequency").is_some());
    assert!(payload.get("timing").is_none());
    assert_eq!(payload["frequency"]["posts"], 1);

    let response = app
        .get("/insights/posting-strategy?include=astrology", token)
        .await;
    assert_eq!(response.status(), 400);

    let response = app.get("/insights/posting-strategy", token).await;
    assert_eq!(response.status(), 200);
    let payload: serde_json::Value = response.json().await.unwrap();
    assert!(payload.get("timing").is_some());
    assert!(payload.get("content_mix").is_some());
    assert!(payload.get("frequency").is_some());
}

#[tokio::test]
async fn summary_and_posts_reflect_stored_counters() {
    let app = spawn_app().await;
    let body = app
        .register_tenant(&hex_pubkey(0xb5), "https://example.com/hook")
        .await;
    let token = body["api_token"].as_str().unwrap();
    let tenant_id = body["tenant_id"].as_i64().unwrap();
    let now = chrono::Utc::now().timestamp();

    app.state
        .activity
        .upsert_post(tenant_id, &event_id(0x41), "popular", None, now - 600)
        .await
        .unwrap();
    app.state
        .activity
        .upsert_post(tenant_id, &event_id(0x42), "quiet", None, now - 300)
        .await
        .unwrap();

    // Engagement lands on the older post through the router transaction.
    app.state
        .events
        .record(&NewEvent {
            tenant_id,
            event_id: event_id(0x43),
            kind: EventKind::Reaction,
            author_pubkey: hex_pubkey(0xc7),
            content: "+".into(),
            metadata: json!({}),
            created_at: now - 100,
            target_note: Some(event_id(0x41)),
            zap_sats: 0,
        })
        .await
        .unwrap();

    let response = app.get("/metrics/summary", token).await;
    let payload: serde_json::Value = response.json().await.unwrap();
    assert_eq!(payload["summary"]["posts"], 2);
    assert_eq!(payload["summary"]["reactions"], 1);

    // Engagement sort puts the reacted post first despite being older.
    let response = app.get("/metrics/posts?sort=engagement", token).await;
    let payload: serde_json::Value = response.json().await.unwrap();
    let posts = payload["posts"].as_array().unwrap();
    assert_eq!(posts[0]["note_id"], event_id(0x41));

    let response = app.get("/metrics/posts?sort=weird", token).await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn follower_series_counts_gains() {
    let app = spawn_app().await;
    let body = app
        .register_tenant(&hex_pubkey(0xb6), "https://example.com/hook")
        .await;
    let token = body["api_token"].as_str().unwrap();
    let tenant_id = body["tenant_id"].as_i64().unwrap();

    for (i, follower) in [0xd1u8, 0xd2, 0xd3].iter().enumerate() {
        seed_interaction(
            &app,
            tenant_id,
            0x50 + i as u8,
            &hex_pubkey(*follower),
            EventKind::Follow,
            0,
        )
        .await;
    }

    let response = app.get("/metrics/followers?period=7d", token).await;
    assert_eq!(response.status(), 200);
    let payload: serde_json::Value = response.json().await.unwrap();
    assert_eq!(payload["gained"], 3);
    let series = payload["series"].as_array().unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0]["count"], 3);
}

mod common;

use common::{event_id, hex_pubkey, spawn_app_with, spawn_mock_relay, text_note};
use deepclaw::relay::event::KIND_CONTACT_LIST;
use deepclaw::relay::nip19::encode_npub;
use deepclaw::relay::NostrEvent;
use serde_json::json;

fn contact_list(id: u8, author: &str, follows: &[&str], created_at: i64) -> NostrEvent {
    NostrEvent {
        id: event_id(id),
        pubkey: author.to_string(),
        created_at,
        kind: KIND_CONTACT_LIST,
        tags: follows.iter().map(|p| vec!["p".to_string(), p.to_string()]).collect(),
        content: String::new(),
        sig: String::new(),
    }
}

#[tokio::test]
async fn quick_scan_builds_histogram_without_persisting() {
    let subject = hex_pubkey(0x91);
    let friend_a = hex_pubkey(0x92);
    let friend_b = hex_pubkey(0x93);
    let now = chrono::Utc::now().timestamp();

    let relay = spawn_mock_relay(vec![
        contact_list(0x01, &subject, &[&friend_a, &friend_b], now - 60),
        text_note(0x11, &friend_a, &hex_pubkey(0x0f), now - 3600, "a1"),
        text_note(0x12, &friend_a, &hex_pubkey(0x0f), now - 7200, "a2"),
        text_note(0x13, &friend_b, &hex_pubkey(0x0f), now - 1800, "b1"),
    ])
    .await;

    let relay_url = relay.url.clone();
    let app = spawn_app_with(move |config| {
        config.relay_urls = vec![relay_url];
    })
    .await;

    let npub = encode_npub(&subject).unwrap();
    let response = app
        .client
        .get(format!(
            "{}/metrics/timing/quick-scan?npub={npub}&period=7d",
            app.address
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let payload: serde_json::Value = response.json().await.unwrap();

    assert_eq!(payload["success"], true);
    assert_eq!(payload["pubkey"], subject);
    assert_eq!(payload["following"]["count"], 2);

    let distribution = payload["following"]["hourly_distribution"]
        .as_array()
        .unwrap();
    assert_eq!(distribution.len(), 24);
    let sum: i64 = distribution.iter().map(|v| v.as_i64().unwrap()).sum();
    assert_eq!(sum, payload["posts_analyzed"].as_i64().unwrap());
    assert_eq!(sum, 3);

    // Nothing was persisted by the public scan.
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM post_activity")
        .fetch_one(&app.state.pool)
        .await
        .unwrap();
    assert_eq!(rows, 0);
}

#[tokio::test]
async fn quick_scan_without_contact_list_is_a_recoverable_failure() {
    let relay = spawn_mock_relay(vec![]).await;
    let relay_url = relay.url.clone();
    let app = spawn_app_with(move |config| {
        config.relay_urls = vec![relay_url];
    })
    .await;

    let response = app
        .client
        .get(format!(
            "{}/metrics/timing/quick-scan?npub={}&period=7d",
            app.address,
            hex_pubkey(0x94)
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let payload: serde_json::Value = response.json().await.unwrap();
    assert_eq!(payload["success"], false);
    assert_eq!(payload["reason"], "no contact list");
}

#[tokio::test]
async fn quick_scan_rejects_bad_pubkeys() {
    let app = spawn_app_with(|_| {}).await;
    let response = app
        .client
        .get(format!(
            "{}/metrics/timing/quick-scan?npub=garbage",
            app.address
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn full_scan_persists_activity_and_populates_following() {
    let tenant_pk = hex_pubkey(0x95);
    let friend = hex_pubkey(0x96);
    let fan = hex_pubkey(0x97);
    let now = chrono::Utc::now().timestamp();

    let relay = spawn_mock_relay(vec![
        // The tenant follows `friend`; `fan` follows the tenant.
        contact_list(0x21, &tenant_pk, &[&friend], now - 120),
        contact_list(0x22, &fan, &[&tenant_pk], now - 90),
        // Recent notes from everyone involved.
        text_note(0x31, &tenant_pk, &hex_pubkey(0x0f), now - 600, "own note"),
        text_note(0x32, &friend, &hex_pubkey(0x0f), now - 1200, "friend note"),
        text_note(0x33, &fan, &hex_pubkey(0x0f), now - 1800, "fan note"),
    ])
    .await;

    let relay_url = relay.url.clone();
    let app = spawn_app_with(move |config| {
        config.relay_urls = vec![relay_url];
    })
    .await;

    let body = app
        .register_tenant(&tenant_pk, "https://example.com/hook")
        .await;
    let token = body["api_token"].as_str().unwrap();
    let tenant_id = body["tenant_id"].as_i64().unwrap();

    let response = app
        .post_json("/admin/scan-network", token, &json!({ "period": "7d" }))
        .await;
    assert_eq!(response.status(), 200);
    let payload: serde_json::Value = response.json().await.unwrap();
    assert_eq!(payload["success"], true);
    assert_eq!(payload["following_scanned"], 1);
    assert_eq!(payload["followers_scanned"], 1);
    assert_eq!(payload["posts_analyzed"], 3);

    // Roles landed correctly.
    let roles: Vec<(String, String)> = sqlx::query_as(
        "SELECT author_pubkey, author_role FROM post_activity WHERE tenant_id = ?1 ORDER BY note_id",
    )
    .bind(tenant_id)
    .fetch_all(&app.state.pool)
    .await
    .unwrap();
    assert!(roles.contains(&(tenant_pk.clone(), "self".to_string())));
    assert!(roles.contains(&(friend.clone(), "following".to_string())));
    assert!(roles.contains(&(fan.clone(), "follower".to_string())));

    // The tenant's own note is now a post row, and following was recorded.
    let post = app
        .state
        .activity
        .find_post(tenant_id, &event_id(0x31))
        .await
        .unwrap();
    assert!(post.is_some());
    assert_eq!(
        app.state.activity.following_pubkeys(tenant_id).await.unwrap(),
        vec![friend.clone()]
    );

    // Scanning again is idempotent: same rows, not duplicates.
    let response = app
        .post_json("/admin/scan-network", token, &json!({ "period": "7d" }))
        .await;
    assert_eq!(response.status(), 200);
    let rows: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM post_activity WHERE tenant_id = ?1")
            .bind(tenant_id)
            .fetch_one(&app.state.pool)
            .await
            .unwrap();
    assert_eq!(rows, 3);
}

#[tokio::test]
async fn scan_survives_a_dead_relay() {
    let tenant_pk = hex_pubkey(0x98);
    let friend = hex_pubkey(0x99);
    let now = chrono::Utc::now().timestamp();

    let relay = spawn_mock_relay(vec![
        contact_list(0x41, &tenant_pk, &[&friend], now - 120),
        text_note(0x42, &friend, &hex_pubkey(0x0f), now - 600, "note"),
    ])
    .await;

    let relay_url = relay.url.clone();
    let app = spawn_app_with(move |config| {
        // One live relay, one that refuses connections.
        config.relay_urls = vec!["ws://127.0.0.1:1".into(), relay_url];
        config.relay_query_timeout = std::time::Duration::from_secs(2);
    })
    .await;

    let body = app
        .register_tenant(&tenant_pk, "https://example.com/hook")
        .await;
    let token = body["api_token"].as_str().unwrap();

    let response = app
        .post_json("/admin/scan-network", token, &json!({ "period": "7d" }))
        .await;
    assert_eq!(response.status(), 200);
    let payload: serde_json::Value = response.json().await.unwrap();
    assert_eq!(payload["success"], true);
    assert_eq!(payload["posts_analyzed"], 1);
}

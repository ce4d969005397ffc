#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use deepclaw::database::{get_connection_pool, migrate_database};
use deepclaw::relay::event::KIND_TEXT_NOTE;
use deepclaw::relay::NostrEvent;
use deepclaw::routes::app;
use deepclaw::server::config::{AppConfig, AppState};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

pub struct TestApp {
    pub address: String,
    pub state: AppState,
    pub client: reqwest::Client,
    pub webhook_rx: Option<mpsc::Receiver<i64>>,
    _db_dir: tempfile::TempDir,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(configure: impl FnOnce(&mut AppConfig)) -> TestApp {
    let db_dir = tempfile::tempdir().expect("failed to create temp dir");
    let db_path = db_dir.path().join("test.db");

    let mut config = AppConfig {
        database_url: format!("sqlite:{}", db_path.display()),
        relay_urls: Vec::new(),
        ..AppConfig::default()
    };
    configure(&mut config);

    let pool = get_connection_pool(&config.database_url)
        .await
        .expect("failed to connect to test database");
    migrate_database(&pool)
        .await
        .expect("failed to migrate test database");

    let (state, webhook_rx) = AppState::new(config, pool);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let address = format!("http://{}", listener.local_addr().unwrap());

    let router = app(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server died");
    });

    TestApp {
        address,
        state,
        client: reqwest::Client::new(),
        webhook_rx: Some(webhook_rx),
        _db_dir: db_dir,
    }
}

impl TestApp {
    pub async fn register_tenant(&self, pubkey: &str, callback_url: &str) -> Value {
        let response = self
            .client
            .post(format!("{}/auth/register", self.address))
            .json(&json!({ "pubkey": pubkey, "callbackUrl": callback_url }))
            .send()
            .await
            .expect("register request failed");
        assert_eq!(response.status(), 201, "registration should succeed");
        response.json().await.expect("register response not json")
    }

    pub async fn get(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .bearer_auth(token)
            .send()
            .await
            .expect("request failed")
    }

    pub async fn post_json(&self, path: &str, token: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .expect("request failed")
    }
}

pub fn hex_pubkey(n: u8) -> String {
    format!("{n:02x}").repeat(32)
}

pub fn event_id(n: u8) -> String {
    format!("{n:02x}").repeat(32)
}

pub fn text_note(id: u8, author: &str, p_tag: &str, created_at: i64, content: &str) -> NostrEvent {
    NostrEvent {
        id: event_id(id),
        pubkey: author.to_string(),
        created_at,
        kind: KIND_TEXT_NOTE,
        tags: vec![vec!["p".into(), p_tag.into()]],
        content: content.to_string(),
        sig: String::new(),
    }
}

pub struct MockRelay {
    pub url: String,
    pub events: Arc<Mutex<Vec<NostrEvent>>>,
}

impl MockRelay {
    pub fn push(&self, event: NostrEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// A minimal in-process relay: answers every REQ with the canned events
/// matching its filters, then EOSE. Enough protocol for the pool, the
/// scanner and the quick scan.
pub async fn spawn_mock_relay(initial: Vec<NostrEvent>) -> MockRelay {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind mock relay");
    let addr = listener.local_addr().unwrap();
    let events = Arc::new(Mutex::new(initial));

    let served = events.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let served = served.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    let Message::Text(text) = message else {
                        continue;
                    };
                    let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    if frame[0] == "REQ" {
                        let sub_id = frame[1].as_str().unwrap_or("sub").to_string();
                        let filters: Vec<Value> = frame
                            .as_array()
                            .map(|a| a.iter().skip(2).cloned().collect())
                            .unwrap_or_default();
                        let snapshot: Vec<NostrEvent> = served.lock().unwrap().clone();
                        for event in snapshot.iter().filter(|e| matches_any(&filters, e)) {
                            let frame = json!(["EVENT", sub_id, event]).to_string();
                            if ws.send(Message::Text(frame)).await.is_err() {
                                return;
                            }
                        }
                        let eose = json!(["EOSE", sub_id]).to_string();
                        if ws.send(Message::Text(eose)).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });

    MockRelay {
        url: format!("ws://{addr}"),
        events,
    }
}

fn matches_any(filters: &[Value], event: &NostrEvent) -> bool {
    filters.is_empty() || filters.iter().any(|f| matches_filter(f, event))
}

fn matches_filter(filter: &Value, event: &NostrEvent) -> bool {
    if let Some(kinds) = filter["kinds"].as_array() {
        if !kinds.iter().any(|k| k.as_u64() == Some(event.kind as u64)) {
            return false;
        }
    }
    if let Some(authors) = filter["authors"].as_array() {
        if !authors.iter().any(|a| a.as_str() == Some(&event.pubkey)) {
            return false;
        }
    }
    if let Some(p_tags) = filter["#p"].as_array() {
        let referenced = event.p_tags();
        if !p_tags
            .iter()
            .filter_map(|p| p.as_str())
            .any(|p| referenced.contains(&p))
        {
            return false;
        }
    }
    if let Some(since) = filter["since"].as_i64() {
        if event.created_at < since {
            return false;
        }
    }
    true
}

use axum::extract::State;
use axum::routing::{get, post, put};
use axum::{middleware, Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::server::auth::require_auth;
use crate::server::config::AppState;
use crate::server::handlers::{admin, auth, events, insights, metrics, network};

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let relays = state.relay_pool.health();
    let status = if relays.degraded { "degraded" } else { "healthy" };
    Json(json!({ "status": status, "relays": relays }))
}

/// The full HTTP surface. Everything under the authenticated router goes
/// through bearer auth and rate limiting; the public routes are liveness,
/// registration and the transient quick scan.
pub fn app(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health_check))
        .route("/auth/register", post(auth::register))
        .route("/metrics/timing/quick-scan", get(metrics::quick_scan));

    let authenticated = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/webhook", put(auth::update_webhook))
        .route("/metrics/summary", get(metrics::summary))
        .route("/metrics/followers", get(metrics::followers))
        .route("/metrics/posts", get(metrics::posts))
        .route(
            "/metrics/timing/network-activity",
            get(metrics::network_activity),
        )
        .route(
            "/insights/best-posting-times",
            get(insights::best_posting_times),
        )
        .route("/insights/top-engagers", get(insights::top_engagers))
        .route("/insights/should-engage", get(insights::should_engage))
        .route("/insights/posting-strategy", get(insights::posting_strategy))
        .route("/events/activity", get(events::activity))
        .route("/events/acknowledge", post(events::acknowledge))
        .route("/network/top-engagers", get(insights::top_engagers))
        .route("/network/follow-suggestions", get(network::follow_suggestions))
        .route("/admin/scan-network", post(admin::scan_network))
        .route("/admin/aggregate-activity", post(admin::aggregate_activity))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    public
        .merge(authenticated)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

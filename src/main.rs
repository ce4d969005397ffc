use deepclaw::database::{get_connection_pool, migrate_database};
use deepclaw::routes::app;
use deepclaw::server::config::{AppConfig, AppState};
use deepclaw::server::services::aggregator::run_aggregation_loop;
use deepclaw::server::services::dispatcher::{
    run_summary_scheduler, DispatcherConfig, WebhookDispatcher,
};
use deepclaw::server::services::registry::spawn_registry_reloader;
use deepclaw::server::services::router::EventRouter;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deepclaw=info,tower_http=info".into()),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env();
    let port = config.port;

    let pool = get_connection_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");
    migrate_database(&pool)
        .await
        .expect("Failed to run migrations");

    let (state, webhook_rx) = AppState::new(config, pool);

    // Cooperative shutdown: flipping the flag fans out to every role.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Initial registry load so the relay pool subscribes for the existing
    // tenant set right away.
    match state.registry.reload_from(&state.tenants).await {
        Ok(_) => state.relay_pool.update_tenants(&state.registry.all_pubkeys()),
        Err(e) => warn!(error = ?e, "initial tenant registry load failed"),
    }

    state.relay_pool.spawn(shutdown_rx.clone());

    spawn_registry_reloader(
        state.registry.clone(),
        state.tenants.clone(),
        state.relay_pool.clone(),
        state.config.registry_reload_interval,
        shutdown_rx.clone(),
    );

    let router = EventRouter::new(
        state.registry.clone(),
        state.events.clone(),
        state.activity.clone(),
        state.webhook_wake.clone(),
    );
    tokio::spawn(router.run(state.relay_pool.clone(), shutdown_rx.clone()));

    let mut dispatcher_config = DispatcherConfig {
        timeout: state.config.webhook_timeout,
        ..DispatcherConfig::default()
    };
    // Honor a configured retry budget: truncate or stretch the default
    // 1s/5s/25s ladder.
    let retries = state.config.webhook_retries.max(1) as usize;
    while dispatcher_config.retry_delays.len() > retries {
        dispatcher_config.retry_delays.pop();
    }
    while dispatcher_config.retry_delays.len() < retries {
        let last = *dispatcher_config.retry_delays.last().expect("non-empty ladder");
        dispatcher_config.retry_delays.push(last * 5);
    }
    let dispatcher = WebhookDispatcher::new(
        state.pool.clone(),
        state.tenants.clone(),
        dispatcher_config,
    );
    tokio::spawn(dispatcher.run(webhook_rx, shutdown_rx.clone()));

    tokio::spawn(run_summary_scheduler(
        state.pool.clone(),
        state.tenants.clone(),
        state.events.clone(),
        state.activity.clone(),
        state.webhook_wake.clone(),
        DispatcherConfig::default().summary_interval,
        shutdown_rx.clone(),
    ));

    tokio::spawn(run_aggregation_loop(
        state.tenants.clone(),
        state.aggregator.clone(),
        7,
        state.config.aggregation_interval,
        shutdown_rx.clone(),
    ));

    let app = app(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    info!("Starting server on {}", addr);

    let mut serve_shutdown = shutdown_rx.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = serve_shutdown.changed().await;
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    if let Err(e) = server.await {
        warn!(error = %e, "server exited with error");
    }
    info!("shutdown complete");
}

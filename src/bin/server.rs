use std::net::SocketAddr;
use std::sync::Arc;

use profile_relay::AppState;
use profile_relay::cache::{Sweeper, TtlCache};
use profile_relay::config::AppConfig;
use profile_relay::routes::build_router;
use profile_relay::spawn_notifier;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "profile_relay=debug,tower_http=debug".parse().unwrap()),
        )
        .init();

    let config = AppConfig::from_env();
    tracing::info!("starting server on {}", config.listen_addr);

    let notifier = spawn_notifier(&config);
    let cache = Arc::new(TtlCache::new());
    let sweeper = Sweeper::spawn(cache.clone(), config.sweep_interval);

    let state = AppState::new(config.clone(), cache, notifier.clone())
        .expect("failed to initialize application state");

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind");
    tracing::info!("listening on {}", config.listen_addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");

    sweeper.stop().await;
    notifier.shutdown().await;
    tracing::info!("server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

//! Courier API server binary entrypoint.

use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use courier_common::config::AppConfig;
use courier_common::db::{create_pool, run_migrations};
use courier_common::redis_pool::try_create_redis_pool;

use courier_api::build_app;
use courier_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "courier_api=debug,courier_notifier=info,courier_engine=info,tower_http=debug",
            )
        }))
        .init();

    tracing::info!("Starting Courier API server...");

    let config = AppConfig::from_env()?;
    if config.cron_secret.is_none() && config.service_jwt_secret.is_none() {
        tracing::warn!("Neither CRON_SECRET nor SERVICE_JWT_SECRET is set, trigger endpoints will reject every request");
    }

    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;

    // A Redis outage only disables cooldown suppression.
    let redis = try_create_redis_pool(&config.redis_url).await;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let app = build_app(AppState::from_config(config, pool, redis));

    tracing::info!("API server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received shutdown signal, stopping gracefully...");
        })
        .await?;

    tracing::info!("Courier API server stopped.");
    Ok(())
}

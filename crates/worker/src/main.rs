use std::sync::Arc;

use courier_common::config::AppConfig;
use courier_common::db;
use courier_common::redis_pool::try_create_redis_pool;
use courier_engine::alerts::AlertRunner;
use courier_notifier::providers::ProviderRegistry;
use courier_notifier::runner::NotificationRunner;
use courier_notifier::store::{JobStore, PgJobStore};
use courier_worker::scheduler::Scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "courier_worker=info,courier_notifier=info,courier_engine=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Courier worker starting...");

    let config = AppConfig::from_env()?;
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;
    let redis = try_create_redis_pool(&config.redis_url).await;

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let providers = Arc::new(ProviderRegistry::from_credentials(&config.channels));
    tracing::info!(channels = providers.len(), "Channel providers registered");

    let notifications = NotificationRunner::from_config(&config, store, providers);
    let alerts = AlertRunner::from_config(&config, pool, redis, notifications.dispatcher().clone());
    let scheduler = Scheduler::from_config(&config, Arc::new(notifications), Arc::new(alerts));

    tokio::select! {
        _ = scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("Courier worker stopped.");
    Ok(())
}

//! Shared application state for the Axum API server.

use std::sync::Arc;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use courier_common::config::AppConfig;
use courier_engine::alerts::AlertRunner;
use courier_notifier::producer::Producer;
use courier_notifier::providers::ProviderRegistry;
use courier_notifier::runner::NotificationRunner;
use courier_notifier::store::{JobStore, PgJobStore};

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub notifications: Arc<NotificationRunner>,
    pub producer: Arc<Producer>,
    pub alerts: Arc<AlertRunner>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        notifications: NotificationRunner,
        producer: Producer,
        alerts: AlertRunner,
    ) -> Self {
        Self {
            config: Arc::new(config),
            notifications: Arc::new(notifications),
            producer: Arc::new(producer),
            alerts: Arc::new(alerts),
        }
    }

    /// Production wiring: Postgres queue, credentialed providers, Redis cooldowns.
    pub fn from_config(config: AppConfig, pool: PgPool, redis: Option<ConnectionManager>) -> Self {
        let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
        let providers = Arc::new(ProviderRegistry::from_credentials(&config.channels));

        let notifications = NotificationRunner::from_config(&config, store.clone(), providers);
        let producer = Producer::new(store, config.default_max_attempts);
        let alerts = AlertRunner::from_config(
            &config,
            pool,
            redis,
            notifications.dispatcher().clone(),
        );

        Self::new(config, notifications, producer, alerts)
    }
}

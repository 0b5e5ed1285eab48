use redis::Client;
use redis::aio::ConnectionManager;

/// Create a Redis connection manager for async operations.
pub async fn create_redis_pool(redis_url: &str) -> anyhow::Result<ConnectionManager> {
    let client = Client::open(redis_url)?;
    let manager = ConnectionManager::new(client).await?;

    tracing::info!("Connected to Redis");
    Ok(manager)
}

/// Like [`create_redis_pool`], but a cache outage only downgrades the alert
/// path: callers receive `None` and the cooldown tracker fails open.
pub async fn try_create_redis_pool(redis_url: &str) -> Option<ConnectionManager> {
    match create_redis_pool(redis_url).await {
        Ok(manager) => Some(manager),
        Err(e) => {
            tracing::warn!(error = %e, "Redis unavailable, cooldown tracking will fail open");
            None
        }
    }
}

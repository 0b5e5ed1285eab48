//! Cooldown tracker: suppress repeat alerts for the same (alert, level) pair.
//!
//! The store keeps the time each pair was last notified, with an expiry that
//! is independent of (and longer than) the suppression window. The check is
//! read-then-write and tolerates the race between concurrent runners; a store
//! outage fails open so alerts are never lost to a cache problem.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;

use courier_common::error::AppError;
use courier_common::types::AlertLevel;

/// Key under which the last notification time of a pair is stored.
pub fn cooldown_key(alert_id: &str, level: AlertLevel) -> String {
    format!("alert:cooldown:{}:{}", alert_id, level.as_str())
}

#[async_trait]
pub trait CooldownStore: Send + Sync {
    /// Last recorded time for `key`, ignoring records that expired before `now`.
    async fn last_notified(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, AppError>;

    async fn record(&self, key: &str, at: DateTime<Utc>, ttl: Duration) -> Result<(), AppError>;
}

/// Redis-backed store: `SET key <rfc3339> EX ttl`.
///
/// Built without a connection when Redis was unreachable at startup; every
/// call then reports `Unavailable` and the tracker fails open.
#[derive(Clone)]
pub struct RedisCooldownStore {
    redis: Option<ConnectionManager>,
}

impl RedisCooldownStore {
    pub fn new(redis: Option<ConnectionManager>) -> Self {
        Self { redis }
    }

    fn connection(&self) -> Result<ConnectionManager, AppError> {
        self.redis
            .clone()
            .ok_or_else(|| AppError::Unavailable("cooldown cache not connected".to_string()))
    }
}

#[async_trait]
impl CooldownStore for RedisCooldownStore {
    // Expiry is enforced by the key's TTL.
    async fn last_notified(
        &self,
        key: &str,
        _now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let mut redis = self.connection()?;
        let raw: Option<String> = redis.get(key).await?;

        // An unparseable value is treated as no record.
        Ok(raw
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|at| at.with_timezone(&Utc)))
    }

    async fn record(&self, key: &str, at: DateTime<Utc>, ttl: Duration) -> Result<(), AppError> {
        let mut redis = self.connection()?;
        let ttl_secs = ttl.num_seconds().max(1) as u64;
        redis
            .set_ex::<_, _, ()>(key, at.to_rfc3339(), ttl_secs)
            .await?;
        Ok(())
    }
}

/// In-process store; entries expire `ttl` after the recorded time, measured
/// on the caller's clock.
#[derive(Debug, Default)]
pub struct MemoryCooldownStore {
    entries: Mutex<HashMap<String, (DateTime<Utc>, DateTime<Utc>)>>,
}

impl MemoryCooldownStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CooldownStore for MemoryCooldownStore {
    async fn last_notified(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(at, _)| *at))
    }

    async fn record(&self, key: &str, at: DateTime<Utc>, ttl: Duration) -> Result<(), AppError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (at, at + ttl));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    Eligible,
    Suppressed { last_notified_at: DateTime<Utc> },
}

pub struct CooldownTracker {
    store: Arc<dyn CooldownStore>,
    window: Duration,
    ttl: Duration,
}

impl CooldownTracker {
    pub fn new(store: Arc<dyn CooldownStore>, window: Duration, ttl: Duration) -> Self {
        Self { store, window, ttl }
    }

    /// Whether `(alert_id, level)` may be notified at `now`. Eligible once
    /// `now - last_notified >= window`.
    pub async fn check(&self, alert_id: &str, level: AlertLevel, now: DateTime<Utc>) -> CooldownDecision {
        let key = cooldown_key(alert_id, level);
        match self.store.last_notified(&key, now).await {
            Ok(Some(last)) if now - last < self.window => {
                tracing::debug!(
                    alert_id,
                    level = %level,
                    last_notified_at = %last,
                    "Alert suppressed, still in cooldown"
                );
                CooldownDecision::Suppressed {
                    last_notified_at: last,
                }
            }
            Ok(_) => CooldownDecision::Eligible,
            Err(e) => {
                tracing::warn!(alert_id, error = %e, "Cooldown check failed, treating alert as eligible");
                CooldownDecision::Eligible
            }
        }
    }

    /// Record a notification at `now`. Failures are logged, never raised.
    pub async fn record(&self, alert_id: &str, level: AlertLevel, now: DateTime<Utc>) {
        let key = cooldown_key(alert_id, level);
        if let Err(e) = self.store.record(&key, now, self.ttl).await {
            tracing::warn!(alert_id, error = %e, "Failed to record alert cooldown");
        }
    }
}

use std::str::FromStr;

use chrono::Duration;
use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Redis connection string (cooldown cache)
    pub redis_url: String,

    /// Shared secret accepted by the trigger endpoints
    pub cron_secret: Option<String>,

    /// HS256 secret for privileged service tokens
    pub service_jwt_secret: Option<String>,

    /// API server port (default: 3000)
    pub server_port: u16,

    /// Maximum number of jobs fetched per run (default: 50)
    pub queue_batch_size: u32,

    /// Number of jobs dispatched concurrently within a batch (default: 8)
    pub worker_concurrency: usize,

    /// Attempt ceiling applied by producers that do not set one (default: 3)
    pub default_max_attempts: i32,

    /// Base retry delay; the n-th failed attempt waits `base * 2^n` (default: 60)
    pub backoff_base_seconds: u64,

    /// Upper bound on a single retry delay (default: 86400)
    pub backoff_max_seconds: u64,

    /// Age after which a `processing` claim is considered orphaned (default: 900)
    pub claim_timeout_seconds: u64,

    /// Window during which a repeated alert is suppressed (default: 3600)
    pub alert_cooldown_seconds: u64,

    /// Expiry of cooldown records in the cache (default: 7200)
    pub alert_cooldown_ttl_seconds: u64,

    /// Notification runner interval used by the worker (default: 60)
    pub notify_interval_seconds: u64,

    /// Alert runner interval used by the worker (default: 300)
    pub alert_interval_seconds: u64,

    pub channels: ChannelCredentials,

    pub alert_targets: AlertTargets,
}

/// Per-channel credentials. A missing value disables that channel without
/// failing startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelCredentials {
    /// Resend API key for email delivery
    pub resend_api_key: Option<String>,
    /// Email sender address
    pub email_from: Option<String>,
    /// Firebase Cloud Messaging server key
    pub fcm_server_key: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub whatsapp_access_token: Option<String>,
    pub whatsapp_phone_number_id: Option<String>,
    pub line_channel_access_token: Option<String>,
    pub zalo_oa_access_token: Option<String>,
    pub kakao_access_token: Option<String>,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_from_number: Option<String>,
}

/// Where operational alerts are delivered.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertTargets {
    pub telegram_chat_id: Option<String>,
    pub email: Option<String>,
    pub push_token: Option<String>,
}

impl Default for AppConfig {
    /// Built-in defaults, without a database URL or any credentials.
    fn default() -> Self {
        Self {
            database_url: String::new(),
            db_max_connections: 20,
            redis_url: "redis://localhost:6379".to_string(),
            cron_secret: None,
            service_jwt_secret: None,
            server_port: 3000,
            queue_batch_size: 50,
            worker_concurrency: 8,
            default_max_attempts: 3,
            backoff_base_seconds: 60,
            backoff_max_seconds: 86_400,
            claim_timeout_seconds: 900,
            alert_cooldown_seconds: 3600,
            alert_cooldown_ttl_seconds: 7200,
            notify_interval_seconds: 60,
            alert_interval_seconds: 300,
            channels: ChannelCredentials::default(),
            alert_targets: AlertTargets::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let d = Self::default();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", d.db_max_connections)?,
            redis_url: optional_var("REDIS_URL").unwrap_or(d.redis_url),
            cron_secret: optional_var("CRON_SECRET"),
            service_jwt_secret: optional_var("SERVICE_JWT_SECRET"),
            server_port: parse_var("SERVER_PORT", d.server_port)?,
            queue_batch_size: parse_var("QUEUE_BATCH_SIZE", d.queue_batch_size)?,
            worker_concurrency: parse_var("WORKER_CONCURRENCY", d.worker_concurrency)?,
            default_max_attempts: parse_var("DEFAULT_MAX_ATTEMPTS", d.default_max_attempts)?,
            backoff_base_seconds: parse_var("BACKOFF_BASE_SECONDS", d.backoff_base_seconds)?,
            backoff_max_seconds: parse_var("BACKOFF_MAX_SECONDS", d.backoff_max_seconds)?,
            claim_timeout_seconds: parse_var("CLAIM_TIMEOUT_SECONDS", d.claim_timeout_seconds)?,
            alert_cooldown_seconds: parse_var("ALERT_COOLDOWN_SECONDS", d.alert_cooldown_seconds)?,
            alert_cooldown_ttl_seconds: parse_var(
                "ALERT_COOLDOWN_TTL_SECONDS",
                d.alert_cooldown_ttl_seconds,
            )?,
            notify_interval_seconds: parse_var("NOTIFY_INTERVAL_SECONDS", d.notify_interval_seconds)?,
            alert_interval_seconds: parse_var("ALERT_INTERVAL_SECONDS", d.alert_interval_seconds)?,
            channels: ChannelCredentials {
                resend_api_key: optional_var("RESEND_API_KEY"),
                email_from: optional_var("EMAIL_FROM"),
                fcm_server_key: optional_var("FCM_SERVER_KEY"),
                telegram_bot_token: optional_var("TELEGRAM_BOT_TOKEN"),
                whatsapp_access_token: optional_var("WHATSAPP_ACCESS_TOKEN"),
                whatsapp_phone_number_id: optional_var("WHATSAPP_PHONE_NUMBER_ID"),
                line_channel_access_token: optional_var("LINE_CHANNEL_ACCESS_TOKEN"),
                zalo_oa_access_token: optional_var("ZALO_OA_ACCESS_TOKEN"),
                kakao_access_token: optional_var("KAKAO_ACCESS_TOKEN"),
                twilio_account_sid: optional_var("TWILIO_ACCOUNT_SID"),
                twilio_auth_token: optional_var("TWILIO_AUTH_TOKEN"),
                twilio_from_number: optional_var("TWILIO_FROM_NUMBER"),
            },
            alert_targets: AlertTargets {
                telegram_chat_id: optional_var("ALERT_TELEGRAM_CHAT_ID"),
                email: optional_var("ALERT_EMAIL"),
                push_token: optional_var("ALERT_PUSH_TOKEN"),
            },
        })
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::seconds(self.backoff_base_seconds as i64)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::seconds(self.backoff_max_seconds as i64)
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::seconds(self.claim_timeout_seconds as i64)
    }

    pub fn cooldown_window(&self) -> Duration {
        Duration::seconds(self.alert_cooldown_seconds as i64)
    }

    pub fn cooldown_ttl(&self) -> Duration {
        Duration::seconds(self.alert_cooldown_ttl_seconds as i64)
    }
}

/// Read an optional variable, treating an empty value as unset.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match optional_var(name) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                name,
                std::any::type_name::<T>()
            )
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_default_when_unset() {
        let value: u32 = parse_var("COURIER_TEST_SURELY_UNSET_VAR", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        // SAFETY: test-local variable name, not read by other tests.
        unsafe { std::env::set_var("COURIER_TEST_GARBAGE_VAR", "not-a-number") };
        let result: anyhow::Result<u64> = parse_var("COURIER_TEST_GARBAGE_VAR", 1);
        assert!(result.is_err());
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.queue_batch_size, 50);
        assert_eq!(config.backoff_base(), Duration::minutes(1));
        assert_eq!(config.cooldown_window(), Duration::hours(1));
        assert!(config.cron_secret.is_none());
    }

    #[test]
    fn test_optional_var_ignores_blank() {
        unsafe { std::env::set_var("COURIER_TEST_BLANK_VAR", "   ") };
        assert!(optional_var("COURIER_TEST_BLANK_VAR").is_none());
    }
}

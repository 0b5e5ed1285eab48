use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery channels with a registered provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Push,
    Telegram,
    Whatsapp,
    Line,
    Zalo,
    Kakao,
    Sms,
}

impl Channel {
    pub const ALL: [Channel; 8] = [
        Channel::Email,
        Channel::Push,
        Channel::Telegram,
        Channel::Whatsapp,
        Channel::Line,
        Channel::Zalo,
        Channel::Kakao,
        Channel::Sms,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Push => "push",
            Channel::Telegram => "telegram",
            Channel::Whatsapp => "whatsapp",
            Channel::Line => "line",
            Channel::Zalo => "zalo",
            Channel::Kakao => "kakao",
            Channel::Sms => "sms",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a channel name has no matching variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown channel '{0}'")]
pub struct UnknownChannel(pub String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownChannel(s.to_string()))
    }
}

/// Lifecycle state of a queued job.
///
/// `Sent`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Sent | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Sent => write!(f, "sent"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A unit of outbound work as stored in `notification_queue`.
///
/// `channel` is kept as free text: rows written by producers may name a
/// channel that has no provider, and that must surface as a delivery failure
/// rather than a decode error.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationJob {
    pub id: Uuid,
    /// Parent record in `notifications`, mirrored on terminal transitions.
    pub notification_id: Option<Uuid>,
    /// Producer-side grouping key (e.g. a reservation id).
    pub reference_id: Option<String>,
    pub channel: String,
    pub recipient: String,
    pub recipient_name: Option<String>,
    pub subject: Option<String>,
    pub body: String,
    pub notification_type: String,
    /// Structured template variables for channels that format their own payloads.
    pub data: serde_json::Value,
    pub priority: i32,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub process_after: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub provider_message_id: Option<String>,
}

impl NotificationJob {
    /// Whether the queue fetcher may select this job at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending
            && self.process_after <= now
            && self.attempts < self.max_attempts
    }
}

/// Producer-side description of a job to enqueue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub channel: String,
    pub recipient: String,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
    pub notification_type: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub max_attempts: Option<i32>,
    /// Earliest delivery time; omitted means "now".
    #[serde(default)]
    pub process_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reference_id: Option<String>,
}

impl NewJob {
    pub fn new(
        channel: impl Into<String>,
        recipient: impl Into<String>,
        notification_type: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            recipient: recipient.into(),
            recipient_name: None,
            subject: None,
            body: body.into(),
            notification_type: notification_type.into(),
            data: None,
            priority: None,
            max_attempts: None,
            process_after: None,
            reference_id: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_recipient_name(mut self, name: impl Into<String>) -> Self {
        self.recipient_name = Some(name.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_reference(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.process_after = Some(at);
        self
    }
}

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCategory {
    Performance,
    Database,
    Errors,
    Capacity,
    Business,
}

/// A monitored metric with warning/critical thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: AlertCategory,
    /// Metric name looked up in the metric source.
    pub metric: String,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    /// `true` when larger values are worse (latency); `false` for hit rates.
    pub higher_is_bad: bool,
    pub unit: String,
    pub warning_action: String,
    pub critical_action: String,
}

/// Outcome of evaluating one definition. Produced fresh every cycle.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvaluationResult {
    pub alert: AlertDefinition,
    pub level: AlertLevel,
    pub current_value: f64,
    pub message: String,
    pub action: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_parse_is_case_insensitive() {
        assert_eq!("Telegram".parse::<Channel>(), Ok(Channel::Telegram));
        assert_eq!(" sms ".parse::<Channel>(), Ok(Channel::Sms));
    }

    #[test]
    fn test_unknown_channel_rejected() {
        let err = "fax".parse::<Channel>().unwrap_err();
        assert_eq!(err.to_string(), "unknown channel 'fax'");
    }

    #[test]
    fn test_channel_display_round_trips() {
        for channel in Channel::ALL {
            assert_eq!(channel.to_string().parse::<Channel>(), Ok(channel));
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Sent.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn test_alert_level_serializes_uppercase() {
        let json = serde_json::to_string(&AlertLevel::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");
    }
}

//! Channel providers: one adapter per delivery mechanism.
//!
//! Every provider implements [`ChannelProvider`]. Providers never panic and never
//! leak transport errors: every failure comes back as a [`ProviderError`] whose
//! variant tells the dispatcher whether a retry can help.
//!
//! Providers are looked up through a [`ProviderRegistry`] keyed by [`Channel`],
//! so adding a channel never touches the dispatcher.

pub mod email;
pub mod http;
pub mod kakao;
pub mod line;
pub mod push;
pub mod sms;
pub mod telegram;
pub mod whatsapp;
pub mod zalo;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use courier_common::config::ChannelCredentials;
use courier_common::types::{Channel, NotificationJob};

/// Normalized delivery request handed to a provider.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub job_id: Uuid,
    pub recipient: String,
    pub recipient_name: Option<String>,
    pub subject: Option<String>,
    pub body: String,
    pub notification_type: String,
    pub data: serde_json::Value,
}

impl SendRequest {
    /// Stable key for providers that support request deduplication.
    pub fn idempotency_key(&self) -> String {
        self.job_id.to_string()
    }

    /// String value from the structured template data, if present.
    pub fn data_str(&self, key: &str) -> Option<String> {
        match self.data.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl From<&NotificationJob> for SendRequest {
    fn from(job: &NotificationJob) -> Self {
        Self {
            job_id: job.id,
            recipient: job.recipient.clone(),
            recipient_name: job.recipient_name.clone(),
            subject: job.subject.clone(),
            body: job.body.clone(),
            notification_type: job.notification_type.clone(),
            data: job.data.clone(),
        }
    }
}

/// Successful delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: Option<String>,
}

impl SendReceipt {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            message_id: Some(id.into()),
        }
    }
}

/// Typed delivery failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("{0} channel not configured")]
    NotConfigured(Channel),

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("provider rejected request ({code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transient failure: {0}")]
    Transient(String),
}

impl ProviderError {
    /// Only rate limits and transient outages can succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_) | ProviderError::Transient(_))
    }
}

/// A delivery mechanism.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    fn channel(&self) -> Channel;

    /// Whether credentials are present. Unconfigured providers stay registered
    /// and answer every send with [`ProviderError::NotConfigured`].
    fn is_configured(&self) -> bool;

    async fn send(&self, request: &SendRequest) -> Result<SendReceipt, ProviderError>;
}

impl std::fmt::Debug for dyn ChannelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelProvider")
            .field("channel", &self.channel())
            .field("configured", &self.is_configured())
            .finish()
    }
}

/// Channel → provider lookup.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Channel, Arc<dyn ChannelProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every built-in provider from the supplied credentials.
    pub fn from_credentials(credentials: &ChannelCredentials) -> Self {
        let mut registry = Self::new();
        registry.register(email::EmailProvider::new(
            credentials.resend_api_key.clone(),
            credentials.email_from.clone(),
        ));
        registry.register(push::PushProvider::new(credentials.fcm_server_key.clone()));
        registry.register(telegram::TelegramProvider::new(
            credentials.telegram_bot_token.clone(),
        ));
        registry.register(whatsapp::WhatsAppProvider::new(
            credentials.whatsapp_access_token.clone(),
            credentials.whatsapp_phone_number_id.clone(),
        ));
        registry.register(line::LineProvider::new(
            credentials.line_channel_access_token.clone(),
        ));
        registry.register(zalo::ZaloProvider::new(credentials.zalo_oa_access_token.clone()));
        registry.register(kakao::KakaoProvider::new(credentials.kakao_access_token.clone()));
        registry.register(sms::SmsProvider::new(
            credentials.twilio_account_sid.clone(),
            credentials.twilio_auth_token.clone(),
            credentials.twilio_from_number.clone(),
        ));

        let unconfigured: Vec<&str> = registry
            .providers
            .values()
            .filter(|p| !p.is_configured())
            .map(|p| p.channel().as_str())
            .collect();
        if !unconfigured.is_empty() {
            tracing::warn!(
                channels = %unconfigured.join(","),
                "Channels without credentials will fail jobs without retrying"
            );
        }

        registry
    }

    /// Register a provider, replacing any previous one for the same channel.
    pub fn register<P: ChannelProvider + 'static>(&mut self, provider: P) -> &mut Self {
        self.providers.insert(provider.channel(), Arc::new(provider));
        self
    }

    pub fn register_arc(&mut self, provider: Arc<dyn ChannelProvider>) -> &mut Self {
        self.providers.insert(provider.channel(), provider);
        self
    }

    /// Resolve a provider by channel name as stored on the job.
    pub fn resolve(&self, channel: &str) -> Option<Arc<dyn ChannelProvider>> {
        let channel: Channel = channel.parse().ok()?;
        self.providers.get(&channel).cloned()
    }

    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.providers.keys().copied().collect();
        channels.sort_by_key(|c| c.as_str());
        channels
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

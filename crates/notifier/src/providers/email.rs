//! Email delivery through the Resend HTTP API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use courier_common::types::Channel;

use super::http;
use super::{ChannelProvider, ProviderError, SendReceipt, SendRequest};

const RESEND_API_BASE: &str = "https://api.resend.com";

pub struct EmailProvider {
    api_key: Option<String>,
    from: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: Option<String>,
}

impl EmailProvider {
    pub fn new(api_key: Option<String>, from: Option<String>) -> Self {
        Self {
            api_key,
            from,
            base_url: RESEND_API_BASE.to_string(),
            client: http::client(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn payload(from: &str, to: &str, request: &SendRequest) -> serde_json::Value {
        let subject = request
            .subject
            .clone()
            .unwrap_or_else(|| request.notification_type.replace('_', " "));
        json!({
            "from": from,
            "to": [to],
            "subject": subject,
            "text": request.body,
            "tags": [{ "name": "notification_type", "value": request.notification_type }],
        })
    }
}

#[async_trait]
impl ChannelProvider for EmailProvider {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some() && self.from.is_some()
    }

    async fn send(&self, request: &SendRequest) -> Result<SendReceipt, ProviderError> {
        let api_key = http::require(&self.api_key, Channel::Email)?;
        let from = http::require(&self.from, Channel::Email)?;
        let to = http::require_recipient(&request.recipient)?;
        if !to.contains('@') {
            return Err(ProviderError::InvalidRecipient(format!(
                "'{}' is not an email address",
                to
            )));
        }

        let response = self
            .client
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(api_key)
            .header("Idempotency-Key", request.idempotency_key())
            .json(&Self::payload(from, to, request))
            .send()
            .await
            .map_err(|e| http::transport_error(Channel::Email, e))?;

        if !response.status().is_success() {
            return Err(http::response_error(Channel::Email, response).await);
        }

        match response.json::<ResendResponse>().await {
            Ok(body) => Ok(SendReceipt {
                message_id: body.id,
            }),
            Err(e) => Ok(http::accepted_without_receipt(Channel::Email, request, e)),
        }
    }
}

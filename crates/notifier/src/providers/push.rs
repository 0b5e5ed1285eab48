//! Mobile push through Firebase Cloud Messaging (legacy HTTP endpoint).

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use courier_common::types::Channel;

use super::http;
use super::{ChannelProvider, ProviderError, SendReceipt, SendRequest};

const FCM_API_BASE: &str = "https://fcm.googleapis.com";

/// FCM error codes that mean the device token itself is bad.
const INVALID_TOKEN_ERRORS: &[&str] = &["InvalidRegistration", "NotRegistered", "MissingRegistration"];

/// FCM error codes worth retrying.
const TRANSIENT_ERRORS: &[&str] = &["Unavailable", "InternalServerError", "DeviceMessageRateExceeded"];

#[derive(Debug, Clone, Serialize)]
struct FcmPayload {
    to: String,
    notification: FcmNotification,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    data: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
struct FcmNotification {
    title: String,
    body: String,
}

#[derive(Debug, Deserialize)]
struct FcmResponse {
    #[serde(default)]
    results: Vec<FcmResult>,
}

#[derive(Debug, Deserialize)]
struct FcmResult {
    message_id: Option<String>,
    error: Option<String>,
}

pub struct PushProvider {
    server_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl PushProvider {
    pub fn new(server_key: Option<String>) -> Self {
        Self {
            server_key,
            base_url: FCM_API_BASE.to_string(),
            client: http::client(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn payload(token: &str, request: &SendRequest) -> FcmPayload {
        let mut data = HashMap::new();
        data.insert("job_id".to_string(), request.job_id.to_string());
        data.insert(
            "notification_type".to_string(),
            request.notification_type.clone(),
        );

        FcmPayload {
            to: token.to_string(),
            notification: FcmNotification {
                title: request
                    .subject
                    .clone()
                    .unwrap_or_else(|| "Notification".to_string()),
                body: request.body.clone(),
            },
            data,
        }
    }

    fn classify_result(result: FcmResult) -> Result<SendReceipt, ProviderError> {
        match result.error {
            None => Ok(SendReceipt {
                message_id: result.message_id,
            }),
            Some(code) if INVALID_TOKEN_ERRORS.contains(&code.as_str()) => {
                Err(ProviderError::InvalidRecipient(code))
            }
            Some(code) if TRANSIENT_ERRORS.contains(&code.as_str()) => {
                Err(ProviderError::Transient(code))
            }
            Some(code) => Err(ProviderError::Rejected {
                code: 200,
                message: code,
            }),
        }
    }
}

#[async_trait]
impl ChannelProvider for PushProvider {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    fn is_configured(&self) -> bool {
        self.server_key.is_some()
    }

    async fn send(&self, request: &SendRequest) -> Result<SendReceipt, ProviderError> {
        let server_key = http::require(&self.server_key, Channel::Push)?;
        let token = http::require_recipient(&request.recipient)?;

        let response = self
            .client
            .post(format!("{}/fcm/send", self.base_url))
            .header("Authorization", format!("key={}", server_key))
            .json(&Self::payload(token, request))
            .send()
            .await
            .map_err(|e| http::transport_error(Channel::Push, e))?;

        if !response.status().is_success() {
            return Err(http::response_error(Channel::Push, response).await);
        }

        let body: FcmResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => return Ok(http::accepted_without_receipt(Channel::Push, request, e)),
        };

        match body.results.into_iter().next() {
            Some(result) => Self::classify_result(result),
            None => Ok(http::accepted_without_receipt(
                Channel::Push,
                request,
                "FCM response carried no results",
            )),
        }
    }
}

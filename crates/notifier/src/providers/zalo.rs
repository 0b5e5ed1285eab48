//! Zalo Official Account customer-service messages.
//!
//! Zalo answers HTTP 200 for most failures and reports them through a
//! non-zero `error` field in the body.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use courier_common::types::Channel;

use super::http;
use super::{ChannelProvider, ProviderError, SendReceipt, SendRequest};

const ZALO_API_BASE: &str = "https://openapi.zalo.me/v3.0/oa";

#[derive(Debug, Deserialize)]
struct ZaloResponse {
    #[serde(default)]
    error: i64,
    message: Option<String>,
    data: Option<ZaloData>,
}

#[derive(Debug, Deserialize)]
struct ZaloData {
    message_id: Option<String>,
}

pub struct ZaloProvider {
    access_token: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl ZaloProvider {
    pub fn new(access_token: Option<String>) -> Self {
        Self {
            access_token,
            base_url: ZALO_API_BASE.to_string(),
            client: http::client(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn classify(error: i64, message: String) -> ProviderError {
        match error {
            // user not following the OA, or unknown user id
            -213 | -201 => ProviderError::InvalidRecipient(message),
            // quota exceeded
            -32 => ProviderError::RateLimited(message),
            _ => ProviderError::Rejected {
                code: error,
                message,
            },
        }
    }
}

#[async_trait]
impl ChannelProvider for ZaloProvider {
    fn channel(&self) -> Channel {
        Channel::Zalo
    }

    fn is_configured(&self) -> bool {
        self.access_token.is_some()
    }

    async fn send(&self, request: &SendRequest) -> Result<SendReceipt, ProviderError> {
        let token = http::require(&self.access_token, Channel::Zalo)?;
        let user_id = http::require_recipient(&request.recipient)?;

        let text = match &request.subject {
            Some(subject) => format!("{}\n{}", subject, request.body),
            None => request.body.clone(),
        };

        let response = self
            .client
            .post(format!("{}/message/cs", self.base_url))
            .header("access_token", token)
            .json(&json!({
                "recipient": { "user_id": user_id },
                "message": { "text": text },
            }))
            .send()
            .await
            .map_err(|e| http::transport_error(Channel::Zalo, e))?;

        if !response.status().is_success() {
            return Err(http::response_error(Channel::Zalo, response).await);
        }

        let body: ZaloResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => return Ok(http::accepted_without_receipt(Channel::Zalo, request, e)),
        };

        if body.error != 0 {
            let message = body
                .message
                .unwrap_or_else(|| format!("Zalo error {}", body.error));
            return Err(Self::classify(body.error, message));
        }

        Ok(SendReceipt {
            message_id: body.data.and_then(|d| d.message_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> SendRequest {
        SendRequest {
            job_id: Uuid::new_v4(),
            recipient: "2512523625412515".into(),
            recipient_name: None,
            subject: Some("Đặt bàn".into()),
            body: "Bàn của bạn đã sẵn sàng".into(),
            notification_type: "table_ready".into(),
            data: json!({}),
        }
    }

    #[tokio::test]
    async fn test_send_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/cs"))
            .and(header("access_token", "oa-token"))
            .and(body_partial_json(json!({"recipient": {"user_id": "2512523625412515"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": 0,
                "message": "Success",
                "data": { "message_id": "a2c1e7b3", "user_id": "2512523625412515" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = ZaloProvider::new(Some("oa-token".into())).with_base_url(server.uri());
        let receipt = provider.send(&request()).await.unwrap();
        assert_eq!(receipt.message_id.as_deref(), Some("a2c1e7b3"));
    }

    #[tokio::test]
    async fn test_error_in_body_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": -213,
                "message": "User has not followed OA"
            })))
            .mount(&server)
            .await;

        let provider = ZaloProvider::new(Some("t".into())).with_base_url(server.uri());
        let err = provider.send(&request()).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::InvalidRecipient("User has not followed OA".into())
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_quota_error_is_retryable() {
        assert!(ZaloProvider::classify(-32, "quota".into()).is_retryable());
        assert!(!ZaloProvider::classify(-124, "token expired".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_unreadable_success_body_is_still_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/cs"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = ZaloProvider::new(Some("oa-token".into())).with_base_url(server.uri());
        let receipt = provider.send(&request()).await.unwrap();
        assert_eq!(receipt.message_id, None);
    }
}

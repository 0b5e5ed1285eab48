//! KakaoTalk "send to friends" default text template.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use courier_common::types::Channel;

use super::http;
use super::{ChannelProvider, ProviderError, SendReceipt, SendRequest};

const KAKAO_API_BASE: &str = "https://kapi.kakao.com";

/// Kakao caps default text templates at 200 characters.
const MAX_TEXT_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
struct KakaoSendResponse {
    #[serde(default)]
    successful_receiver_uuids: Vec<String>,
    #[serde(default)]
    failure_info: Vec<KakaoFailure>,
}

#[derive(Debug, Deserialize)]
struct KakaoFailure {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct KakaoErrorBody {
    code: Option<i64>,
    msg: Option<String>,
}

pub struct KakaoProvider {
    access_token: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl KakaoProvider {
    pub fn new(access_token: Option<String>) -> Self {
        Self {
            access_token,
            base_url: KAKAO_API_BASE.to_string(),
            client: http::client(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn template_object(request: &SendRequest) -> String {
        let text = match &request.subject {
            Some(subject) => format!("{}\n{}", subject, request.body),
            None => request.body.clone(),
        };
        let text: String = text.chars().take(MAX_TEXT_CHARS).collect();
        let link = request.data_str("url").unwrap_or_default();
        json!({
            "object_type": "text",
            "text": text,
            "link": { "web_url": link, "mobile_web_url": link },
        })
        .to_string()
    }

    fn classify(status: reqwest::StatusCode, code: Option<i64>, msg: String) -> ProviderError {
        match code {
            // -10: quota exceeded
            Some(-10) => ProviderError::RateLimited(msg),
            // -532 receiver not a friend, -501 not a KakaoTalk user
            Some(-532) | Some(-501) => ProviderError::InvalidRecipient(msg),
            _ => http::status_error(status, msg),
        }
    }
}

#[async_trait]
impl ChannelProvider for KakaoProvider {
    fn channel(&self) -> Channel {
        Channel::Kakao
    }

    fn is_configured(&self) -> bool {
        self.access_token.is_some()
    }

    async fn send(&self, request: &SendRequest) -> Result<SendReceipt, ProviderError> {
        let token = http::require(&self.access_token, Channel::Kakao)?;
        let receiver = http::require_recipient(&request.recipient)?;

        let receivers = json!([receiver]).to_string();
        let template = Self::template_object(request);
        let form = [
            ("receiver_uuids", receivers.as_str()),
            ("template_object", template.as_str()),
        ];

        let response = self
            .client
            .post(format!(
                "{}/v1/api/talk/friends/message/default/send",
                self.base_url
            ))
            .bearer_auth(token)
            .form(&form)
            .send()
            .await
            .map_err(|e| http::transport_error(Channel::Kakao, e))?;

        let status = response.status();
        if !status.is_success() {
            let body: KakaoErrorBody = response.json().await.unwrap_or(KakaoErrorBody {
                code: None,
                msg: None,
            });
            let msg = body
                .msg
                .unwrap_or_else(|| format!("Kakao API error: {}", status));
            return Err(Self::classify(status, body.code, msg));
        }

        let body: KakaoSendResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => return Ok(http::accepted_without_receipt(Channel::Kakao, request, e)),
        };

        if body.successful_receiver_uuids.iter().any(|u| u == receiver) {
            return Ok(SendReceipt::default());
        }
        match body.failure_info.into_iter().next() {
            Some(failure) => Err(Self::classify(status, Some(failure.code), failure.msg)),
            None => Ok(http::accepted_without_receipt(
                Channel::Kakao,
                request,
                "Kakao reported no receivers",
            )),
        }
    }
}

//! Telegram Bot API delivery (`sendMessage`).

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use courier_common::types::Channel;

use super::http;
use super::{ChannelProvider, ProviderError, SendReceipt, SendRequest};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct TelegramApiResponse {
    ok: bool,
    result: Option<TelegramMessage>,
    description: Option<String>,
    error_code: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
}

pub struct TelegramProvider {
    bot_token: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl TelegramProvider {
    pub fn new(bot_token: Option<String>) -> Self {
        Self {
            bot_token,
            base_url: TELEGRAM_API_BASE.to_string(),
            client: http::client(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Markdown text with the subject as a bold heading.
    fn format_text(request: &SendRequest) -> String {
        match &request.subject {
            Some(subject) => format!(
                "*{}*\n\n{}",
                escape_markdown(subject),
                escape_markdown(&request.body)
            ),
            None => escape_markdown(&request.body),
        }
    }

    fn api_error(status: StatusCode, body: &TelegramApiResponse) -> ProviderError {
        let description = body
            .description
            .clone()
            .unwrap_or_else(|| format!("Telegram API error: {}", status));
        let code = body.error_code.unwrap_or(status.as_u16());

        match code {
            // "chat not found", "bot was blocked by the user"
            400 | 403 => ProviderError::InvalidRecipient(description),
            _ => match StatusCode::from_u16(code) {
                Ok(status) => http::status_error(status, description),
                Err(_) => ProviderError::Transient(description),
            },
        }
    }
}

/// Escape the characters legacy Telegram Markdown treats as markup.
fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl ChannelProvider for TelegramProvider {
    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    fn is_configured(&self) -> bool {
        self.bot_token.is_some()
    }

    async fn send(&self, request: &SendRequest) -> Result<SendReceipt, ProviderError> {
        let token = http::require(&self.bot_token, Channel::Telegram)?;
        let chat_id = http::require_recipient(&request.recipient)?;

        let body = json!({
            "chat_id": chat_id,
            "text": Self::format_text(request),
            "parse_mode": "Markdown",
        });

        let response = self
            .client
            .post(format!("{}/bot{}/sendMessage", self.base_url, token))
            .json(&body)
            .send()
            .await
            .map_err(|e| http::transport_error(Channel::Telegram, e))?;

        let status = response.status();
        let result: TelegramApiResponse = match response.json().await {
            Ok(result) => result,
            Err(_) if !status.is_success() => {
                return Err(http::status_error(
                    status,
                    format!("Telegram API error: {}", status),
                ));
            }
            Err(e) => return Ok(http::accepted_without_receipt(Channel::Telegram, request, e)),
        };

        if !result.ok {
            return Err(Self::api_error(status, &result));
        }

        Ok(SendReceipt {
            message_id: result.result.map(|m| m.message_id.to_string()),
        })
    }
}

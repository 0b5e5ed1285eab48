//! SMS through Twilio's Messages resource.

use async_trait::async_trait;
use serde::Deserialize;

use courier_common::types::Channel;

use super::http;
use super::{ChannelProvider, ProviderError, SendReceipt, SendRequest};

const TWILIO_API_BASE: &str = "https://api.twilio.com";

#[derive(Debug, Deserialize)]
struct TwilioMessage {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct TwilioError {
    code: Option<i64>,
    message: Option<String>,
}

pub struct SmsProvider {
    account_sid: Option<String>,
    auth_token: Option<String>,
    from_number: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl SmsProvider {
    pub fn new(
        account_sid: Option<String>,
        auth_token: Option<String>,
        from_number: Option<String>,
    ) -> Self {
        Self {
            account_sid,
            auth_token,
            from_number,
            base_url: TWILIO_API_BASE.to_string(),
            client: http::client(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn classify(status: reqwest::StatusCode, error: TwilioError) -> ProviderError {
        let message = error
            .message
            .unwrap_or_else(|| format!("Twilio API error: {}", status));
        match error.code {
            // 21211 invalid 'To', 21614 not a mobile number, 21610 unsubscribed
            Some(21211) | Some(21614) | Some(21610) => ProviderError::InvalidRecipient(message),
            _ => http::status_error(status, message),
        }
    }
}

#[async_trait]
impl ChannelProvider for SmsProvider {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn is_configured(&self) -> bool {
        self.account_sid.is_some() && self.auth_token.is_some() && self.from_number.is_some()
    }

    async fn send(&self, request: &SendRequest) -> Result<SendReceipt, ProviderError> {
        let sid = http::require(&self.account_sid, Channel::Sms)?;
        let auth_token = http::require(&self.auth_token, Channel::Sms)?;
        let from = http::require(&self.from_number, Channel::Sms)?;
        let to = format!(
            "+{}",
            http::normalize_phone(http::require_recipient(&request.recipient)?)?
        );

        let body = match &request.subject {
            Some(subject) => format!("{}: {}", subject, request.body),
            None => request.body.clone(),
        };

        let response = self
            .client
            .post(format!(
                "{}/2010-04-01/Accounts/{}/Messages.json",
                self.base_url, sid
            ))
            .basic_auth(sid, Some(auth_token))
            .form(&[("To", to.as_str()), ("From", from), ("Body", body.as_str())])
            .send()
            .await
            .map_err(|e| http::transport_error(Channel::Sms, e))?;

        let status = response.status();
        if !status.is_success() {
            let error: TwilioError = response.json().await.unwrap_or(TwilioError {
                code: None,
                message: None,
            });
            return Err(Self::classify(status, error));
        }

        match response.json::<TwilioMessage>().await {
            Ok(message) => Ok(SendReceipt::with_id(message.sid)),
            Err(e) => Ok(http::accepted_without_receipt(Channel::Sms, request, e)),
        }
    }
}

//! WhatsApp Business delivery through the Meta Cloud API.
//!
//! Business-initiated conversations need a pre-approved template, so
//! notification types with a known template are sent as template messages
//! whenever the job carries template data. Everything else goes out as
//! plain text, which Meta only accepts inside the 24h customer window.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use courier_common::types::Channel;

use super::http;
use super::{ChannelProvider, ProviderError, SendReceipt, SendRequest};

const WHATSAPP_API_BASE: &str = "https://graph.facebook.com/v18.0";

/// Reservation placeholders, in template body order.
const RESERVATION_FIELDS: &[&str] = &[
    "guest_name",
    "restaurant_name",
    "date",
    "time",
    "party_size",
    "reservation_code",
];

/// Wallet placeholders, in template body order.
const WALLET_FIELDS: &[&str] = &["amount", "bonus", "total", "balance", "restaurant_name"];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Template {
    name: &'static str,
    fields: &'static [&'static str],
}

/// Approved template for a notification type.
fn template_for(notification_type: &str) -> Option<Template> {
    let (name, fields) = match notification_type {
        "reservation_confirmed" => ("reservation_confirmed", RESERVATION_FIELDS),
        "reminder_24h" | "reservation_reminder_24h" => ("reservation_reminder_24h", RESERVATION_FIELDS),
        "reminder_2h" | "reservation_reminder_2h" => ("reservation_reminder_2h", RESERVATION_FIELDS),
        "reservation_cancelled" => ("reservation_cancelled", RESERVATION_FIELDS),
        "reservation_updated" => ("reservation_updated", RESERVATION_FIELDS),
        "topup_success" | "wallet_topup_success" => ("wallet_topup_success", WALLET_FIELDS),
        "payment_success" | "wallet_payment_success" => ("wallet_payment_success", WALLET_FIELDS),
        "low_balance" | "wallet_low_balance" => ("wallet_low_balance", WALLET_FIELDS),
        _ => return None,
    };
    Some(Template { name, fields })
}

/// Map an app locale onto a WhatsApp language code.
fn language_code(locale: Option<&str>) -> &'static str {
    match locale.unwrap_or("en") {
        "it" => "it",
        "vi" => "vi",
        "ja" => "ja",
        "ko" => "ko",
        "th" => "th",
        "zh" => "zh_CN",
        _ => "en",
    }
}

#[derive(Debug, Deserialize)]
struct WhatsAppResponse {
    #[serde(default)]
    messages: Vec<WhatsAppMessageId>,
    error: Option<WhatsAppError>,
}

#[derive(Debug, Deserialize)]
struct WhatsAppMessageId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WhatsAppError {
    message: Option<String>,
    code: Option<i64>,
}

pub struct WhatsAppProvider {
    access_token: Option<String>,
    phone_number_id: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl WhatsAppProvider {
    pub fn new(access_token: Option<String>, phone_number_id: Option<String>) -> Self {
        Self {
            access_token,
            phone_number_id,
            base_url: WHATSAPP_API_BASE.to_string(),
            client: http::client(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn has_template_data(request: &SendRequest) -> bool {
        request.data.as_object().is_some_and(|o| !o.is_empty())
    }

    fn payload(to: &str, request: &SendRequest) -> Value {
        let template = template_for(&request.notification_type)
            .filter(|_| Self::has_template_data(request));

        match template {
            Some(template) => {
                let parameters: Vec<Value> = template
                    .fields
                    .iter()
                    .map(|field| {
                        json!({
                            "type": "text",
                            "text": request.data_str(field).unwrap_or_default(),
                        })
                    })
                    .collect();
                let locale = request.data_str("locale");
                json!({
                    "messaging_product": "whatsapp",
                    "recipient_type": "individual",
                    "to": to,
                    "type": "template",
                    "template": {
                        "name": template.name,
                        "language": { "code": language_code(locale.as_deref()) },
                        "components": [{ "type": "body", "parameters": parameters }],
                    },
                })
            }
            None => json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": to,
                "type": "text",
                "text": { "preview_url": false, "body": request.body },
            }),
        }
    }

    /// Graph API error codes: 131026 undeliverable, 131030 not on allow list,
    /// 130429/131048/131056 throughput limits.
    fn classify_error(status: reqwest::StatusCode, error: WhatsAppError) -> ProviderError {
        let message = error
            .message
            .unwrap_or_else(|| "Failed to send WhatsApp message".to_string());
        match error.code {
            Some(131026) | Some(131030) => ProviderError::InvalidRecipient(message),
            Some(130429) | Some(131048) | Some(131056) => ProviderError::RateLimited(message),
            Some(code) if !status.is_server_error() => ProviderError::Rejected { code, message },
            _ => http::status_error(status, message),
        }
    }
}

#[async_trait]
impl ChannelProvider for WhatsAppProvider {
    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    fn is_configured(&self) -> bool {
        self.access_token.is_some() && self.phone_number_id.is_some()
    }

    async fn send(&self, request: &SendRequest) -> Result<SendReceipt, ProviderError> {
        let token = http::require(&self.access_token, Channel::Whatsapp)?;
        let phone_number_id = http::require(&self.phone_number_id, Channel::Whatsapp)?;
        let to = http::normalize_phone(http::require_recipient(&request.recipient)?)?;

        let response = self
            .client
            .post(format!("{}/{}/messages", self.base_url, phone_number_id))
            .bearer_auth(token)
            .json(&Self::payload(&to, request))
            .send()
            .await
            .map_err(|e| http::transport_error(Channel::Whatsapp, e))?;

        let status = response.status();
        let body: WhatsAppResponse = match response.json().await {
            Ok(body) => body,
            Err(_) if !status.is_success() => {
                return Err(http::status_error(
                    status,
                    format!("WhatsApp API error: {}", status),
                ));
            }
            Err(e) => return Ok(http::accepted_without_receipt(Channel::Whatsapp, request, e)),
        };

        if let Some(error) = body.error {
            return Err(Self::classify_error(status, error));
        }
        if !status.is_success() {
            return Err(http::status_error(
                status,
                format!("WhatsApp API error: {}", status),
            ));
        }

        Ok(SendReceipt {
            message_id: body.messages.into_iter().next().map(|m| m.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(notification_type: &str, data: Value) -> SendRequest {
        SendRequest {
            job_id: Uuid::new_v4(),
            recipient: "+39 333-123 4567".into(),
            recipient_name: Some("Marco".into()),
            subject: None,
            body: "Your reservation is confirmed".into(),
            notification_type: notification_type.into(),
            data,
        }
    }

    #[test]
    fn test_template_payload_orders_parameters() {
        let req = request(
            "reservation_confirmed",
            json!({
                "guest_name": "Marco",
                "restaurant_name": "Trattoria",
                "date": "2026-05-01",
                "time": "20:00",
                "party_size": 4,
                "reservation_code": "ABC123",
                "locale": "it"
            }),
        );
        let payload = WhatsAppProvider::payload("393331234567", &req);
        assert_eq!(payload["type"], "template");
        assert_eq!(payload["template"]["name"], "reservation_confirmed");
        assert_eq!(payload["template"]["language"]["code"], "it");
        let params = &payload["template"]["components"][0]["parameters"];
        assert_eq!(params[0]["text"], "Marco");
        assert_eq!(params[4]["text"], "4");
        assert_eq!(params[5]["text"], "ABC123");
    }

    #[test]
    fn test_unknown_type_or_missing_data_sends_text() {
        let payload = WhatsAppProvider::payload("1", &request("promo", json!({"x": 1})));
        assert_eq!(payload["type"], "text");
        assert_eq!(payload["text"]["body"], "Your reservation is confirmed");

        let payload = WhatsAppProvider::payload("1", &request("reservation_confirmed", json!({})));
        assert_eq!(payload["type"], "text");
    }

    #[test]
    fn test_language_fallback() {
        assert_eq!(language_code(Some("zh")), "zh_CN");
        assert_eq!(language_code(Some("fr")), "en");
        assert_eq!(language_code(None), "en");
    }

    #[tokio::test]
    async fn test_send_normalizes_phone() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/PHONE_ID/messages"))
            .and(header("authorization", "Bearer wa-token"))
            .and(body_partial_json(json!({"to": "393331234567"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messaging_product": "whatsapp",
                "messages": [{ "id": "wamid.HBgM" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = WhatsAppProvider::new(Some("wa-token".into()), Some("PHONE_ID".into()))
            .with_base_url(server.uri());
        let receipt = provider.send(&request("promo", json!({}))).await.unwrap();
        assert_eq!(receipt.message_id.as_deref(), Some("wamid.HBgM"));
    }

    #[tokio::test]
    async fn test_graph_error_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "message": "Template name does not exist", "code": 132001 }
            })))
            .mount(&server)
            .await;

        let provider = WhatsAppProvider::new(Some("t".into()), Some("P".into()))
            .with_base_url(server.uri());
        let err = provider.send(&request("promo", json!({}))).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::Rejected {
                code: 132001,
                message: "Template name does not exist".into()
            }
        );
    }

    #[tokio::test]
    async fn test_unreadable_success_body_is_still_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/PHONE_ID/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = WhatsAppProvider::new(Some("wa-token".into()), Some("PHONE_ID".into()))
            .with_base_url(server.uri());
        let receipt = provider.send(&request("promo", json!({}))).await.unwrap();
        assert_eq!(receipt.message_id, None);
    }
}

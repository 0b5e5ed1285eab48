//! LINE Messaging API push delivery.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use courier_common::types::Channel;

use super::http;
use super::{ChannelProvider, ProviderError, SendReceipt, SendRequest};

const LINE_API_BASE: &str = "https://api.line.me/v2/bot";

/// LINE accepts at most five messages per push.
const MAX_MESSAGES: usize = 5;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushResponse {
    #[serde(default)]
    sent_messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

pub struct LineProvider {
    access_token: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl LineProvider {
    pub fn new(access_token: Option<String>) -> Self {
        Self {
            access_token,
            base_url: LINE_API_BASE.to_string(),
            client: http::client(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn messages(request: &SendRequest) -> Vec<Value> {
        let text = match &request.subject {
            Some(subject) => format!("{}\n\n{}", subject, request.body),
            None => request.body.clone(),
        };
        let mut messages = vec![json!({ "type": "text", "text": text })];
        if let Some(card) = reservation_card(request) {
            messages.push(card);
        }
        messages.truncate(MAX_MESSAGES);
        messages
    }
}

/// Flex bubble summarising a reservation, for reservation notifications that
/// carry reservation data.
fn reservation_card(request: &SendRequest) -> Option<Value> {
    let (title, color) = match request.notification_type.as_str() {
        "reservation_confirmed" => ("Reservation Confirmed", "#16A34A"),
        "reservation_cancelled" => ("Reservation Cancelled", "#DC2626"),
        "reminder_24h" | "reservation_reminder_24h" => ("Reminder: Tomorrow!", "#2563EB"),
        "reminder_2h" | "reservation_reminder_2h" => ("Reminder: In 2 hours!", "#2563EB"),
        _ => return None,
    };
    let restaurant = request.data_str("restaurant_name")?;

    let row = |label: &str, key: &str| {
        json!({
            "type": "box",
            "layout": "horizontal",
            "contents": [
                { "type": "text", "text": label, "size": "sm", "color": "#666666", "flex": 1 },
                {
                    "type": "text",
                    "text": request.data_str(key).unwrap_or_else(|| "-".to_string()),
                    "size": "sm",
                    "weight": "bold",
                    "flex": 2
                }
            ]
        })
    };

    Some(json!({
        "type": "flex",
        "altText": format!("{} - {}", title, restaurant),
        "contents": {
            "type": "bubble",
            "header": {
                "type": "box",
                "layout": "vertical",
                "backgroundColor": color,
                "contents": [
                    { "type": "text", "text": title, "color": "#FFFFFF", "weight": "bold", "size": "lg" }
                ]
            },
            "body": {
                "type": "box",
                "layout": "vertical",
                "spacing": "md",
                "contents": [
                    { "type": "text", "text": restaurant, "weight": "bold", "size": "xl", "wrap": true },
                    row("Date", "date"),
                    row("Time", "time"),
                    row("Guests", "party_size"),
                    row("Code", "reservation_code"),
                ]
            }
        }
    }))
}

#[async_trait]
impl ChannelProvider for LineProvider {
    fn channel(&self) -> Channel {
        Channel::Line
    }

    fn is_configured(&self) -> bool {
        self.access_token.is_some()
    }

    async fn send(&self, request: &SendRequest) -> Result<SendReceipt, ProviderError> {
        let token = http::require(&self.access_token, Channel::Line)?;
        let user_id = http::require_recipient(&request.recipient)?;

        let response = self
            .client
            .post(format!("{}/message/push", self.base_url))
            .bearer_auth(token)
            .header("X-Line-Retry-Key", request.idempotency_key())
            .json(&json!({ "to": user_id, "messages": Self::messages(request) }))
            .send()
            .await
            .map_err(|e| http::transport_error(Channel::Line, e))?;

        // 409 means a push with this retry key was already accepted.
        if response.status() == StatusCode::CONFLICT {
            tracing::info!(job_id = %request.job_id, "LINE push already accepted for retry key");
            return Ok(SendReceipt::default());
        }
        if !response.status().is_success() {
            return Err(http::response_error(Channel::Line, response).await);
        }

        let body: PushResponse = response.json().await.unwrap_or(PushResponse {
            sent_messages: Vec::new(),
        });
        Ok(SendReceipt {
            message_id: body.sent_messages.into_iter().next().map(|m| m.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(notification_type: &str, data: Value) -> SendRequest {
        SendRequest {
            job_id: Uuid::new_v4(),
            recipient: "U4af4980629".into(),
            recipient_name: None,
            subject: None,
            body: "See you tonight".into(),
            notification_type: notification_type.into(),
            data,
        }
    }

    #[test]
    fn test_reservation_adds_flex_card() {
        let req = request(
            "reservation_confirmed",
            json!({"restaurant_name": "Sushi Ko", "date": "5/1", "time": "19:00", "party_size": 2}),
        );
        let messages = LineProvider::messages(&req);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["type"], "flex");
        assert_eq!(messages[1]["altText"], "Reservation Confirmed - Sushi Ko");
    }

    #[test]
    fn test_other_types_are_text_only() {
        let messages = LineProvider::messages(&request("promo", json!({"restaurant_name": "X"})));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["text"], "See you tonight");

        // no restaurant, no card
        let messages = LineProvider::messages(&request("reservation_confirmed", json!({})));
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn test_push_sends_retry_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/push"))
            .and(header("authorization", "Bearer line-token"))
            .and(header_exists("x-line-retry-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sentMessages": [{ "id": "461230966842064897", "quoteToken": "q" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = LineProvider::new(Some("line-token".into())).with_base_url(server.uri());
        let receipt = provider.send(&request("promo", json!({}))).await.unwrap();
        assert_eq!(receipt.message_id.as_deref(), Some("461230966842064897"));
    }

    #[tokio::test]
    async fn test_conflict_counts_as_delivered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "message": "The retry key is already accepted"
            })))
            .mount(&server)
            .await;

        let provider = LineProvider::new(Some("t".into())).with_base_url(server.uri());
        assert!(provider.send(&request("promo", json!({}))).await.is_ok());
    }

    #[tokio::test]
    async fn test_bad_request_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "message": "The request body has 1 error(s)"
            })))
            .mount(&server)
            .await;

        let provider = LineProvider::new(Some("t".into())).with_base_url(server.uri());
        let err = provider.send(&request("promo", json!({}))).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::Rejected {
                code: 400,
                message: "The request body has 1 error(s)".into()
            }
        );
    }
}

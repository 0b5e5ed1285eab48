//! Shared HTTP plumbing for providers: client construction and mapping of
//! transport/status failures onto [`ProviderError`].

use std::time::Duration;

use reqwest::StatusCode;

use courier_common::types::Channel;

use super::{ProviderError, SendReceipt, SendRequest};

/// Per-request timeout for provider calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Credential lookup that turns a missing value into `NotConfigured`.
pub fn require<'a>(value: &'a Option<String>, channel: Channel) -> Result<&'a str, ProviderError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ProviderError::NotConfigured(channel))
}

pub fn require_recipient(recipient: &str) -> Result<&str, ProviderError> {
    let trimmed = recipient.trim();
    if trimmed.is_empty() {
        return Err(ProviderError::InvalidRecipient(
            "recipient is empty".to_string(),
        ));
    }
    Ok(trimmed)
}

/// Strip formatting from phone numbers (`+84 90-123` → `8490123`).
pub fn normalize_phone(raw: &str) -> Result<String, ProviderError> {
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '+' | '(' | ')'))
        .collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ProviderError::InvalidRecipient(format!(
            "'{}' is not a phone number",
            raw
        )));
    }
    Ok(digits)
}

/// Network-level failures (timeouts, refused connections, broken bodies).
pub fn transport_error(channel: Channel, err: reqwest::Error) -> ProviderError {
    ProviderError::Transient(format!("{} request failed: {}", channel, err))
}

/// Receipt for a send the provider accepted with a 2xx but whose body could
/// not be read. The message is already out; this must never become a
/// retryable error.
pub fn accepted_without_receipt(
    channel: Channel,
    request: &SendRequest,
    detail: impl std::fmt::Display,
) -> SendReceipt {
    tracing::warn!(
        job_id = %request.job_id,
        channel = %channel,
        detail = %detail,
        "Provider accepted the message but its response was unreadable"
    );
    SendReceipt::default()
}

/// Classify a non-success HTTP status.
pub fn status_error(status: StatusCode, message: impl Into<String>) -> ProviderError {
    let message = message.into();
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(message),
        StatusCode::REQUEST_TIMEOUT => ProviderError::Transient(message),
        s if s.is_server_error() => ProviderError::Transient(format!("{}: {}", s, message)),
        s => ProviderError::Rejected {
            code: s.as_u16() as i64,
            message,
        },
    }
}

/// Consume a non-success response and classify it, keeping the provider's
/// own error text when it sent one.
pub async fn response_error(channel: Channel, response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = extract_message(&body)
        .unwrap_or_else(|| format!("{} API error: {}", channel, status));
    status_error(status, message)
}

/// Pull a human-readable message out of common error body shapes:
/// `{"message": ...}`, `{"description": ...}`, `{"error": {"message": ...}}`,
/// `{"error": "..."}`.
pub fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let candidates = [
        value.get("message"),
        value.get("description"),
        value.get("error").and_then(|e| e.get("message")),
        value.get("error"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(|s| s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "x").is_retryable());
        assert!(status_error(StatusCode::BAD_GATEWAY, "x").is_retryable());
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "x").is_retryable());
        assert!(status_error(StatusCode::REQUEST_TIMEOUT, "x").is_retryable());
        assert!(!status_error(StatusCode::UNAUTHORIZED, "x").is_retryable());
        assert!(!status_error(StatusCode::BAD_REQUEST, "x").is_retryable());
        assert!(!status_error(StatusCode::NOT_FOUND, "x").is_retryable());
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+84 90-123 4567").unwrap(), "84901234567");
        assert_eq!(normalize_phone("(555) 010-9999").unwrap(), "5550109999");
        assert!(normalize_phone("").is_err());
        assert!(normalize_phone("call me").is_err());
    }

    #[test]
    fn test_extract_message_shapes() {
        assert_eq!(
            extract_message(r#"{"message":"bad"}"#).as_deref(),
            Some("bad")
        );
        assert_eq!(
            extract_message(r#"{"ok":false,"description":"chat not found"}"#).as_deref(),
            Some("chat not found")
        );
        assert_eq!(
            extract_message(r#"{"error":{"message":"token expired","code":190}}"#).as_deref(),
            Some("token expired")
        );
        assert_eq!(extract_message("<html>").as_deref(), None);
    }

    #[test]
    fn test_require_blank_is_not_configured() {
        let blank = Some("  ".to_string());
        assert_eq!(
            require(&blank, Channel::Sms),
            Err(ProviderError::NotConfigured(Channel::Sms))
        );
        assert_eq!(require(&Some("k".into()), Channel::Sms), Ok("k"));
    }
}

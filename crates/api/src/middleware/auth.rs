//! Trigger authentication.
//!
//! The runner endpoints accept either the shared cron secret or a service JWT.
//! The secret may arrive as `X-Cron-Secret: <secret>` or as
//! `Authorization: Bearer <secret>`; a bearer value that is not the secret is
//! decoded as an HS256 token and must carry `role = "service"`.
//! With neither secret configured every trigger request is rejected.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use courier_common::config::AppConfig;
use courier_common::error::AppError;

use crate::state::AppState;

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

/// Role claim required on service tokens.
pub const SERVICE_ROLE: &str = "service";

/// Claims carried by a privileged service token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceClaims {
    /// Calling service
    pub sub: String,
    pub role: String,
    /// Expiration time (UNIX timestamp)
    pub exp: i64,
    /// Issued at (UNIX timestamp)
    pub iat: i64,
}

/// How a trigger request proved it may run the pipeline.
///
/// ```ignore
/// async fn handler(auth: TriggerAuth) -> impl IntoResponse {
///     // only reached when authenticated
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerAuth {
    SharedSecret,
    Service { subject: String },
}

/// Encode a service token with the `service` role.
pub fn encode_service_jwt(subject: &str, secret: &str, expiry_hours: i64) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = ServiceClaims {
        sub: subject.to_string(),
        role: SERVICE_ROLE.to_string(),
        exp: (now + Duration::hours(expiry_hours)).timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Auth(format!("Failed to encode JWT: {}", e)))
}

/// Decode and validate a service token, including its role.
pub fn decode_service_jwt(token: &str, secret: &str) -> Result<ServiceClaims, AppError> {
    let claims = decode::<ServiceClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?
    .claims;

    if claims.role != SERVICE_ROLE {
        return Err(AppError::Auth(format!(
            "Token role '{}' may not trigger runs",
            claims.role
        )));
    }
    Ok(claims)
}

/// Byte comparison whose running time does not depend on where the inputs differ.
pub fn secrets_match(given: &str, expected: &str) -> bool {
    let (given, expected) = (given.as_bytes(), expected.as_bytes());
    if given.len() != expected.len() {
        return false;
    }
    given
        .iter()
        .zip(expected)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

/// Authenticate a trigger request from its headers.
pub fn authorize(headers: &HeaderMap, config: &AppConfig) -> Result<TriggerAuth, AppError> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let cron_secret = config.cron_secret.as_deref();

    if let (Some(given), Some(expected)) = (header(CRON_SECRET_HEADER), cron_secret)
        && secrets_match(given, expected)
    {
        return Ok(TriggerAuth::SharedSecret);
    }

    if let Some(token) = header("authorization").and_then(|v| v.strip_prefix("Bearer ")) {
        if cron_secret.is_some_and(|expected| secrets_match(token, expected)) {
            return Ok(TriggerAuth::SharedSecret);
        }
        if let Some(jwt_secret) = config.service_jwt_secret.as_deref() {
            let claims = decode_service_jwt(token, jwt_secret)?;
            return Ok(TriggerAuth::Service { subject: claims.sub });
        }
    }

    Err(AppError::Auth(
        "Missing or invalid credentials. Use 'X-Cron-Secret: <secret>' or 'Bearer <token>'"
            .to_string(),
    ))
}

impl FromRequestParts<AppState> for TriggerAuth {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let result = authorize(&parts.headers, &state.config);

        async move {
            if let Err(e) = &result {
                tracing::warn!(error = %e, "Rejected trigger request");
            }
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const CRON: &str = "cron-secret-for-unit-tests";
    const JWT: &str = "jwt-secret-for-unit-tests";

    fn config() -> AppConfig {
        AppConfig {
            cron_secret: Some(CRON.to_string()),
            service_jwt_secret: Some(JWT.to_string()),
            ..AppConfig::default()
        }
    }

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("abc", "abc"));
        assert!(!secrets_match("abd", "abc"));
        assert!(!secrets_match("ab", "abc"));
    }

    #[test]
    fn test_cron_header_accepted() {
        let auth = authorize(&headers("x-cron-secret", CRON), &config()).unwrap();
        assert_eq!(auth, TriggerAuth::SharedSecret);
    }

    #[test]
    fn test_secret_as_bearer_accepted() {
        let auth = authorize(&headers("authorization", &format!("Bearer {CRON}")), &config()).unwrap();
        assert_eq!(auth, TriggerAuth::SharedSecret);
    }

    #[test]
    fn test_service_token_accepted() {
        let token = encode_service_jwt("billing", JWT, 1).unwrap();
        let auth = authorize(&headers("authorization", &format!("Bearer {token}")), &config()).unwrap();
        assert_eq!(
            auth,
            TriggerAuth::Service {
                subject: "billing".to_string()
            }
        );
    }

    #[test]
    fn test_non_service_role_rejected() {
        let now = Utc::now();
        let claims = ServiceClaims {
            sub: "someone".to_string(),
            role: "authenticated".to_string(),
            exp: (now + Duration::hours(1)).timestamp(),
            iat: now.timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(JWT.as_bytes()),
        )
        .unwrap();

        assert!(decode_service_jwt(&token, JWT).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = encode_service_jwt("billing", JWT, -2).unwrap();
        assert!(decode_service_jwt(&token, JWT).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        assert!(authorize(&headers("x-cron-secret", "nope"), &config()).is_err());
        assert!(authorize(&headers("authorization", "Bearer nope"), &config()).is_err());
        assert!(authorize(&HeaderMap::new(), &config()).is_err());
    }

    #[test]
    fn test_unconfigured_secrets_reject_everything() {
        let config = AppConfig::default();
        assert!(authorize(&headers("x-cron-secret", ""), &config).is_err());
        assert!(authorize(&headers("authorization", "Bearer anything"), &config).is_err());
    }
}

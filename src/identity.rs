use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use moka::future::Cache;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::errors::AppError;
use crate::handlers::AppState;

/// Name of the HTTP-only cookie set by the identity service.
pub const SESSION_COOKIE: &str = "session";

/// The user behind a verified session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedSession {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Client for the managed identity service.
///
/// Session issuance happens elsewhere; this only asks whether a token the
/// browser presented is still valid.
#[derive(Clone)]
pub struct IdentityClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl IdentityClient {
    /// Creates a new `IdentityClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the identity service, without trailing slash.
    /// * `api_key` - Server key sent as a bearer token.
    pub fn new(base_url: String, api_key: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create identity client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Self::new(
            config.identity_base_url.clone(),
            config.identity_api_key.clone(),
        )
    }

    /// Verifies a session token.
    ///
    /// # Returns
    ///
    /// * `Result<VerifiedSession, AppError>` - The session's user, `Unauthorized`
    ///   when the service does not recognise the token, or `ExternalApiError`
    ///   when the service itself fails.
    pub async fn verify_session(&self, token: &str) -> Result<VerifiedSession, AppError> {
        let url = format!("{}/v1/sessions/verify", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "token": token }))
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalApiError(format!("Identity request failed: {}", e))
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND {
            return Err(AppError::Unauthorized(
                "Session is invalid or expired".to_string(),
            ));
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Identity service returned {}: {}",
                status, error_text
            )));
        }

        response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse identity response: {}", e))
        })
    }
}

/// Cache of verified sessions keyed by [`token_digest`].
pub fn session_cache(ttl_secs: u64) -> Cache<String, VerifiedSession> {
    Cache::builder()
        .time_to_live(Duration::from_secs(ttl_secs))
        .max_capacity(10_000)
        .build()
}

/// SHA-256 hex digest of a session token. Raw tokens are never stored.
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Pulls the session token out of the `session` cookie, falling back to a
/// bearer `Authorization` header.
pub fn session_token(parts: &Parts) -> Option<String> {
    let from_cookie = parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string());

    from_cookie
        .or_else(|| {
            parts
                .headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(|token| token.trim().to_string())
        })
        .filter(|token| !token.is_empty())
}

/// Extractor for routes that require a signed-in user.
#[derive(Debug, Clone)]
pub struct AuthUser(pub VerifiedSession);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(parts)
            .ok_or_else(|| AppError::Unauthorized("Missing session".to_string()))?;
        let key = token_digest(&token);

        if let Some(session) = state.session_cache.get(&key).await {
            return Ok(AuthUser(session));
        }

        let session = state.identity.verify_session(&token).await?;
        tracing::debug!("Verified session for user {}", session.user_id);
        state.session_cache.insert(key, session.clone()).await;

        Ok(AuthUser(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/api/v1/reports");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_token_from_cookie() {
        let p = parts(&[("cookie", "theme=dark; session=abc123; other=1")]);
        assert_eq!(session_token(&p), Some("abc123".to_string()));
    }

    #[test]
    fn test_token_from_bearer_header() {
        let p = parts(&[("authorization", "Bearer tok-9")]);
        assert_eq!(session_token(&p), Some("tok-9".to_string()));
    }

    #[test]
    fn test_cookie_wins_over_header() {
        let p = parts(&[
            ("cookie", "session=from-cookie"),
            ("authorization", "Bearer from-header"),
        ]);
        assert_eq!(session_token(&p), Some("from-cookie".to_string()));
    }

    #[test]
    fn test_missing_or_empty_token() {
        assert_eq!(session_token(&parts(&[])), None);
        assert_eq!(session_token(&parts(&[("cookie", "session=")])), None);
        assert_eq!(
            session_token(&parts(&[("authorization", "Basic dXNlcg==")])),
            None
        );
    }

    #[test]
    fn test_token_digest_is_stable_hex() {
        let digest = token_digest("abc");
        assert_eq!(digest.len(), 64);
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}

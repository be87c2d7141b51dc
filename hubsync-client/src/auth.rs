//! OAuth credential state and the refresh protocol.
//!
//! The token manager owns the credential for the duration of a run. OAuth
//! refresh tokens are single-use: every successful refresh rotates the
//! stored token, and the rotated credential is pushed to the configured
//! `CredentialSink` so the embedder can persist it. A failed refresh is
//! terminal — later calls fail fast without another network attempt.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{AuthConfig, OAuthCredential};
use crate::error::AuthError;

/// Safety margin before the recorded expiry at which a token is treated as
/// expired.
const EXPIRY_MARGIN_SECS: i64 = 120;

/// Where rotated credentials are persisted. Config persistence itself is an
/// external collaborator; the connector only promises to call `persist`
/// after every rotation.
#[async_trait]
pub trait CredentialSink: Send + Sync {
    async fn persist(&self, credential: &OAuthCredential) -> Result<(), String>;
}

/// Sink that drops rotated credentials. Suitable when the embedder re-reads
/// tokens from its own store between runs.
pub struct NullCredentialSink;

#[async_trait]
impl CredentialSink for NullCredentialSink {
    async fn persist(&self, _credential: &OAuthCredential) -> Result<(), String> {
        Ok(())
    }
}

/// Auth material to inject into an outbound request: bearer header for
/// OAuth, query parameter for API keys. Never both.
#[derive(Debug, Clone, Default)]
pub struct AuthValues {
    pub headers: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}

enum OAuthState {
    Valid(OAuthCredential),
    Failed(String),
}

enum Mode {
    ApiKey(String),
    OAuth(Mutex<OAuthState>),
}

/// Owns credential state and the refresh protocol.
pub struct TokenManager {
    client: Client,
    token_url: String,
    mode: Mode,
    sink: Arc<dyn CredentialSink>,
}

impl TokenManager {
    pub fn new(
        client: Client,
        token_url: String,
        auth: AuthConfig,
        sink: Arc<dyn CredentialSink>,
    ) -> Self {
        let mode = match auth {
            AuthConfig::ApiKey { hapikey } => Mode::ApiKey(hapikey),
            AuthConfig::OAuth(credential) => Mode::OAuth(Mutex::new(OAuthState::Valid(credential))),
        };
        Self {
            client,
            token_url,
            mode,
            sink,
        }
    }

    /// Returns the header/param injection for the next request, refreshing
    /// the access token first when it is within the expiry margin.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` when the refresh exchange fails, or fails fast
    /// with `AuthError::Terminal` once a previous refresh has failed.
    pub async fn auth_values(&self) -> Result<AuthValues, AuthError> {
        match &self.mode {
            Mode::ApiKey(key) => Ok(AuthValues {
                headers: Vec::new(),
                params: vec![("hapikey".to_string(), key.clone())],
            }),
            Mode::OAuth(state) => {
                // The lock also serializes the EXPIRED -> REFRESHING
                // transition: two callers sharing one credential must not
                // both spend the single-use refresh token.
                let mut guard = state.lock().await;
                match &mut *guard {
                    OAuthState::Failed(reason) => Err(AuthError::Terminal(reason.clone())),
                    OAuthState::Valid(credential) => {
                        if token_expired(credential) {
                            match self.refresh(credential.clone()).await {
                                Ok(rotated) => *credential = rotated,
                                Err(err) => {
                                    *guard = OAuthState::Failed(err.to_string());
                                    return Err(err);
                                }
                            }
                        }
                        let token = credential
                            .access_token
                            .clone()
                            .unwrap_or_default();
                        Ok(AuthValues {
                            headers: vec![("Authorization".to_string(), format!("Bearer {token}"))],
                            params: Vec::new(),
                        })
                    }
                }
            }
        }
    }

    async fn refresh(&self, credential: OAuthCredential) -> Result<OAuthCredential, AuthError> {
        debug!("refreshing access token");

        let form = [
            ("grant_type", "refresh_token"),
            ("redirect_uri", credential.redirect_uri.as_str()),
            ("refresh_token", credential.refresh_token.as_str()),
            ("client_id", credential.client_id.as_str()),
            ("client_secret", credential.client_secret.as_str()),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::RefreshFailed(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(AuthError::RefreshFailed(format!(
                "token endpoint returned {status}: {text}"
            )));
        }

        let token: TokenResponse = serde_json::from_str(&text)
            .map_err(|e| AuthError::RefreshFailed(format!("invalid token response: {e}")))?;

        let expires_at = Utc::now() + ChronoDuration::seconds(token.expires_in);
        // The old refresh token is spent; the rotated one replaces it
        // immediately.
        let rotated = OAuthCredential {
            access_token: Some(token.access_token),
            refresh_token: token.refresh_token,
            expires_at: Some(expires_at),
            ..credential
        };

        if let Err(e) = self.sink.persist(&rotated).await {
            warn!("failed to persist rotated credential: {e}");
        }
        info!(expires_at = %expires_at, "access token refreshed");

        Ok(rotated)
    }
}

fn token_expired(credential: &OAuthCredential) -> bool {
    let Some(access_token) = &credential.access_token else {
        return true;
    };
    if access_token.is_empty() {
        return true;
    }
    match credential.expires_at {
        Some(expires_at) => {
            Utc::now() >= expires_at - ChronoDuration::seconds(EXPIRY_MARGIN_SECS)
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(access_token: Option<&str>, expires_in_secs: Option<i64>) -> OAuthCredential {
        OAuthCredential {
            client_id: "cid".into(),
            client_secret: "secret".into(),
            refresh_token: "rt".into(),
            redirect_uri: "https://example.com/cb".into(),
            access_token: access_token.map(String::from),
            expires_at: expires_in_secs.map(|s| Utc::now() + ChronoDuration::seconds(s)),
        }
    }

    #[test]
    fn missing_token_is_expired() {
        assert!(token_expired(&credential(None, None)));
        assert!(token_expired(&credential(Some(""), Some(3600))));
    }

    #[test]
    fn token_without_expiry_is_expired() {
        assert!(token_expired(&credential(Some("tok"), None)));
    }

    #[test]
    fn margin_applies_before_expiry() {
        // 60s remaining is inside the 120s margin.
        assert!(token_expired(&credential(Some("tok"), Some(60))));
        assert!(!token_expired(&credential(Some("tok"), Some(3600))));
    }
}

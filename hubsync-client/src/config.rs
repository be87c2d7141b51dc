//! Connector configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Configuration for the HTTP layer.
///
/// Base URLs are configurable so tests can point them at a mock server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Base URL for the v3 object endpoints (create/update/search).
    pub api_base_url: String,
    /// Base URL marketing streams write to instead of the objects base.
    pub marketing_base_url: String,
    /// Base URL for the v4 endpoints (associations, labels).
    pub v4_base_url: String,
    /// OAuth token exchange endpoint.
    pub oauth_token_url: String,
    /// Base URL for the v3 property-definition endpoints.
    pub properties_base_url: String,
    /// Optional User-Agent forwarded on every call.
    pub user_agent: Option<String>,
    /// Active auth mode. Exactly one of API key or OAuth per run.
    #[serde(flatten)]
    pub auth: AuthConfig,
    /// Maximum attempts per request, including the first.
    pub max_attempts: u32,
    /// Fixed delay between retry attempts.
    pub retry_interval_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.hubapi.com/crm/v3/objects".to_string(),
            marketing_base_url: "https://api.hubapi.com/marketing/v3".to_string(),
            v4_base_url: "https://api.hubapi.com/crm/v4".to_string(),
            oauth_token_url: "https://api.hubapi.com/oauth/v1/token".to_string(),
            properties_base_url: "https://api.hubapi.com/crm/v3/properties".to_string(),
            user_agent: None,
            auth: AuthConfig::default(),
            max_attempts: 5,
            retry_interval_ms: 10_000,
        }
    }
}

/// The two mutually exclusive auth modes.
///
/// Untagged: a config carrying `client_id`/`client_secret`/`refresh_token`
/// deserializes as OAuth, one carrying only `hapikey` as an API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthConfig {
    OAuth(OAuthCredential),
    ApiKey {
        hapikey: String,
    },
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::ApiKey {
            hapikey: String::new(),
        }
    }
}

/// OAuth credential state.
///
/// Owned exclusively by the token manager once a run starts; refresh tokens
/// are single-use, so the stored value is replaced on every rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthCredential {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

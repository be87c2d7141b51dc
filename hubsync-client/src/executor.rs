//! Retrying request executor.
//!
//! Every outbound call goes through here: auth injection, constant-interval
//! retry with a fixed attempt budget, and failure classification. The push
//! path additionally treats 409 (conflict) and 404 (not found) as soft
//! successes — the response is returned and the caller decides.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::auth::{CredentialSink, NullCredentialSink, TokenManager};
use crate::config::HubConfig;
use crate::error::{ClientResult, RequestError};

/// A received response, already drained.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed JSON body, `Null` when the body was not JSON.
    pub body: Value,
    /// Raw body text, kept for diagnostics and conflict-id parsing.
    pub text: String,
}

impl ApiResponse {
    /// The entity id from the response body, if present.
    pub fn id(&self) -> Option<String> {
        match self.body.get("id") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A remote entity as returned by the search endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteObject {
    pub id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<RemoteObject>,
}

/// Wraps every outbound call with auth, retry and classification.
pub struct RequestExecutor {
    client: Client,
    config: HubConfig,
    tokens: TokenManager,
}

impl RequestExecutor {
    /// Creates an executor that drops rotated credentials.
    pub fn new(config: HubConfig) -> Self {
        Self::with_sink(config, Arc::new(NullCredentialSink))
    }

    /// Creates an executor that persists rotated credentials to `sink`.
    pub fn with_sink(config: HubConfig, sink: Arc<dyn CredentialSink>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to create HTTP client");
        let tokens = TokenManager::new(
            client.clone(),
            config.oauth_token_url.clone(),
            config.auth.clone(),
            sink,
        );
        Self {
            client,
            config,
            tokens,
        }
    }

    /// The configuration this executor was built with.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Executes a request, retrying retryable failures. Any non-2xx status
    /// surfaces as a classified error.
    pub async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        params: &[(&str, &str)],
    ) -> ClientResult<ApiResponse> {
        self.request(method, url, body, params, false).await
    }

    /// GET without a body.
    pub async fn fetch(&self, url: &str, params: &[(&str, &str)]) -> ClientResult<ApiResponse> {
        self.execute(Method::GET, url, None, params).await
    }

    /// Write path with soft-success statuses: 409 and 404 responses are
    /// returned without raising. Create bodies are stripped of nulls;
    /// update bodies keep them (a null clears the remote property).
    pub async fn push(&self, method: Method, url: &str, body: &Value) -> ClientResult<ApiResponse> {
        let cleaned;
        let body = if method == Method::POST {
            cleaned = clean_null(body);
            &cleaned
        } else {
            body
        };
        self.request(method, url, Some(body), &[], true).await
    }

    /// Equality search over one entity kind. Filters combine conjunctively
    /// within a single filter group.
    pub async fn search(
        &self,
        kind_path: &str,
        filters: &[(String, String)],
    ) -> ClientResult<Vec<RemoteObject>> {
        let url = format!("{}/{}/search", self.config.api_base_url, kind_path);
        let filter_values: Vec<Value> = filters
            .iter()
            .map(|(property, value)| {
                json!({"propertyName": property, "operator": "EQ", "value": value})
            })
            .collect();
        let body = json!({"filterGroups": [{"filters": filter_values}]});

        let response = self.execute(Method::POST, &url, Some(&body), &[]).await?;
        let parsed: SearchResponse = serde_json::from_value(response.body).unwrap_or_default();
        Ok(parsed.results)
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        params: &[(&str, &str)],
        push: bool,
    ) -> ClientResult<ApiResponse> {
        let interval = Duration::from_millis(self.config.retry_interval_ms);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(method.clone(), url, body, params, push).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() => {
                    if attempt >= self.config.max_attempts {
                        warn!(attempts = attempt, url, "retry budget exhausted: {err}");
                        return Err(RequestError::RetriesExhausted {
                            attempts: attempt,
                            url: url.to_string(),
                        });
                    }
                    warn!(
                        attempt,
                        max_attempts = self.config.max_attempts,
                        "request failed ({err}), retrying in {}ms",
                        self.config.retry_interval_ms
                    );
                    tokio::time::sleep(interval).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        params: &[(&str, &str)],
        push: bool,
    ) -> ClientResult<ApiResponse> {
        let auth = self.tokens.auth_values().await?;

        let mut request = self.client.request(method.clone(), url);
        for (name, value) in &auth.headers {
            request = request.header(name, value);
        }
        if !auth.params.is_empty() {
            request = request.query(&auth.params);
        }
        if !params.is_empty() {
            request = request.query(params);
        }
        if let Some(agent) = &self.config.user_agent {
            request = request.header("User-Agent", agent);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        info!("{method} {url}");
        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        debug!(status, "{text}");
        let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        let api_response = ApiResponse {
            status,
            body: parsed,
            text,
        };
        if api_response.is_success() {
            return Ok(api_response);
        }

        match status {
            409 if push => Ok(api_response),
            404 if push => {
                warn!("url not found: {url}");
                Ok(api_response)
            }
            429 => Err(RequestError::RateLimited {
                url: url.to_string(),
            }),
            400..=499 => Err(RequestError::Client {
                status,
                url: url.to_string(),
                body: api_response.text,
                request_body: body.map(|b| b.to_string()),
            }),
            _ => Err(RequestError::Server {
                status,
                url: url.to_string(),
                body: api_response.text,
            }),
        }
    }
}

/// Recursively drops null map entries from an outbound body.
fn clean_null(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), clean_null(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(clean_null).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn clean_null_prunes_nested_nulls() {
        let body = json!({
            "properties": {"email": "a@b.com", "phone": null},
            "associations": [{"to": {"id": "9"}, "label": null}]
        });
        let cleaned = clean_null(&body);
        assert_eq!(
            cleaned,
            json!({
                "properties": {"email": "a@b.com"},
                "associations": [{"to": {"id": "9"}}]
            })
        );
    }

    #[test]
    fn api_response_id_accepts_numbers() {
        let response = ApiResponse {
            status: 200,
            body: json!({"id": 42}),
            text: String::new(),
        };
        assert_eq!(response.id(), Some("42".to_string()));
    }

    #[test]
    fn api_response_id_missing() {
        let response = ApiResponse {
            status: 200,
            body: Value::Null,
            text: "not json".into(),
        };
        assert_eq!(response.id(), None);
    }
}

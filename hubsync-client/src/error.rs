//! HTTP layer error types.

use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, RequestError>;

/// Authentication failures. Fatal for the run: never retried.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("authentication previously failed: {0}")]
    Terminal(String),
}

/// Classified request failures.
///
/// `RateLimited`, `Server` and `Network` are retried up to the fixed budget;
/// `Client` and `Auth` are surfaced immediately. Budget exhaustion surfaces
/// as `RetriesExhausted` naming the attempt count and target URL.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("rate limited (429) at {url}")]
    RateLimited { url: String },

    #[error("client error {status} at {url}: {body}")]
    Client {
        status: u16,
        url: String,
        body: String,
        /// The outbound request body, kept for diagnostics.
        request_body: Option<String>,
    },

    #[error("server error {status} at {url}: {body}")]
    Server { status: u16, url: String, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("giving up on request after {attempts} attempts with url {url}")]
    RetriesExhausted { attempts: u32, url: String },
}

impl RequestError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Server { .. } | Self::Network(_)
        )
    }

    /// Whether this error must abort the whole stream rather than a single
    /// record.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::RetriesExhausted { .. })
    }

    /// The response status code, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::Client { status, .. } | Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

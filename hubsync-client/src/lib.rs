//! Authenticated, retrying HTTP layer for the hubsync CRM connector.
//!
//! # Architecture
//!
//! - **Config**: immutable connector configuration (base URLs, auth mode,
//!   retry budget) threaded explicitly into the executor
//! - **TokenManager**: OAuth credential state machine with single-flight
//!   refresh and rotation persistence
//! - **RequestExecutor**: constant-interval retry, failure classification,
//!   soft-success statuses on the push path, and the search call
//!
//! Callers in `hubsync-engine` never touch `reqwest` directly; everything
//! flows through `RequestExecutor`.

mod auth;
mod config;
mod error;
mod executor;

pub use auth::{AuthValues, CredentialSink, NullCredentialSink, TokenManager};
pub use config::{AuthConfig, HubConfig, OAuthCredential};
pub use error::{AuthError, ClientResult, RequestError};
pub use executor::{ApiResponse, RemoteObject, RequestExecutor};

pub use reqwest::Method;

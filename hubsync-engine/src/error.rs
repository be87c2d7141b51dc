//! Engine error types.

use hubsync_client::RequestError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while reconciling a record.
///
/// Everything here except run-fatal transport errors is caught at the
/// engine boundary and converted into a failed `Outcome`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// More than one remote entity matched a lookup. Fatal for the record:
    /// committing would risk overwriting the wrong entity.
    #[error("ambiguous match: {count} remote {kind} entities match lookup on {fields}")]
    AmbiguousMatch {
        kind: String,
        fields: String,
        count: usize,
    },

    /// Kind-specific required-field or field-type violation.
    #[error("schema error: {0}")]
    Schema(String),

    /// An association entry is unusable or a relation label could not be
    /// discovered. Partial failure: the commit stands.
    #[error("association error: {0}")]
    Association(String),

    /// The commit call did not produce a usable entity.
    #[error("commit failed: {0}")]
    Commit(String),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("invalid record: {0}")]
    Record(#[from] hubsync_types::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether this error must abort the whole stream. Only auth failures
    /// and transport retry exhaustion qualify.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Self::Request(err) if err.is_run_fatal())
    }
}

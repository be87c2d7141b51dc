//! Per-record processing outcomes.

use serde::{Deserialize, Serialize};

/// The recorded result of processing one logical record.
///
/// Written exactly once per record, keyed by the record's content hash, and
/// replayed verbatim (flagged as a duplicate) when the same hash arrives
/// again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Content hash of the raw input record.
    pub hash: String,
    /// Whether the commit succeeded. Association-link failures after a
    /// successful commit leave this true; the link error is carried in
    /// `error_message`.
    pub success: bool,
    /// The committed remote entity id, when the commit succeeded.
    pub remote_id: Option<String>,
    /// Optional external correlation id copied from the input record.
    pub external_id: Option<String>,
    /// Human-readable failure (or partial-failure) detail.
    pub error_message: Option<String>,
    /// True when this outcome was replayed for a re-delivered record.
    pub is_duplicate: bool,
}

impl Outcome {
    /// A successful outcome. `error_message` may still carry a partial
    /// association-link failure.
    pub fn success(
        hash: String,
        remote_id: Option<String>,
        external_id: Option<String>,
        error_message: Option<String>,
    ) -> Self {
        Self {
            hash,
            success: true,
            remote_id,
            external_id,
            error_message,
            is_duplicate: false,
        }
    }

    /// A failed outcome.
    pub fn failure(hash: String, external_id: Option<String>, error_message: String) -> Self {
        Self {
            hash,
            success: false,
            remote_id: None,
            external_id,
            error_message: Some(error_message),
            is_duplicate: false,
        }
    }

    /// The same outcome, flagged as a duplicate replay.
    pub fn into_duplicate(mut self) -> Self {
        self.is_duplicate = true;
        self
    }
}

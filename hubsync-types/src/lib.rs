//! Core type definitions for hubsync.
//!
//! This crate defines the plain data types shared by the client and engine
//! crates:
//! - Entity kinds and stream-name routing
//! - Normalized input records and their content hashes
//! - Transformed payloads (remote property maps plus associations)
//! - Lookup specifications for entity resolution
//! - Per-record outcomes
//!
//! Nothing here performs I/O. Network behavior lives in `hubsync-client`,
//! orchestration in `hubsync-engine`.

mod kind;
mod lookup;
mod outcome;
mod payload;
mod record;

pub use kind::EntityKind;
pub use lookup::{LookupPolicy, LookupSpec};
pub use outcome::Outcome;
pub use payload::TransformedPayload;
pub use record::{AssociationLabel, AssociationTarget, NormalizedRecord, RecordAssociation};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

//! Entity kind tags and stream-name routing.
//!
//! Streams are routed to a kind exactly once, at engine construction. The
//! alias table below replaces per-record string matching on stream names.

use serde::{Deserialize, Serialize};

/// The remote object type a stream writes to.
///
/// `Activity` is a stream-level kind only: individual activity records carry
/// a `type` field that dispatches them to `Call` or `Task` before commit.
/// Unknown stream names fall back to `Generic`, which writes to the endpoint
/// named after the raw stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Contact,
    Company,
    Deal,
    Activity,
    Call,
    Task,
    Note,
    Generic(String),
}

/// Streams that write to the marketing API rather than the objects API.
const MARKETING_STREAMS: &[&str] = &["campaigns"];

impl EntityKind {
    /// Resolves a stream name to a kind, case-insensitively.
    pub fn from_stream(stream_name: &str) -> Self {
        match stream_name.to_lowercase().as_str() {
            "contacts" | "contact" | "customers" | "customer" => Self::Contact,
            "companies" | "company" => Self::Company,
            "deals" | "deal" | "opportunities" => Self::Deal,
            "activities" | "activity" => Self::Activity,
            "calls" | "call" => Self::Call,
            "tasks" | "task" => Self::Task,
            "notes" | "note" => Self::Note,
            other => Self::Generic(other.to_string()),
        }
    }

    /// Whether this kind commits against the marketing base URL instead of
    /// the objects base URL.
    pub fn is_marketing(&self) -> bool {
        matches!(self, Self::Generic(name) if MARKETING_STREAMS.contains(&name.as_str()))
    }

    /// Path segment under the kind's base URL.
    pub fn api_path(&self) -> &str {
        match self {
            Self::Contact => "contacts",
            Self::Company => "companies",
            Self::Deal => "deals",
            Self::Activity => "activities",
            Self::Call => "calls",
            Self::Task => "tasks",
            Self::Note => "notes",
            Self::Generic(name) => name,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.api_path())
    }
}

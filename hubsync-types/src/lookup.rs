//! Lookup specifications for entity resolution.

use serde::{Deserialize, Serialize};

/// How multiple lookup fields combine during resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupPolicy {
    /// One search with a conjunction of equality filters across all fields.
    /// Resolution is skipped entirely when any field lacks a value.
    #[default]
    All,
    /// Try fields one at a time in listed order; the first field yielding
    /// exactly one match wins.
    Sequential,
}

/// Ordered lookup fields plus the resolution policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupSpec {
    pub fields: Vec<String>,
    #[serde(default)]
    pub policy: LookupPolicy,
}

impl LookupSpec {
    /// A spec over the given fields with the default policy.
    pub fn new(fields: Vec<String>, policy: LookupPolicy) -> Self {
        Self { fields, policy }
    }

    /// An empty spec: resolution always returns no match.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

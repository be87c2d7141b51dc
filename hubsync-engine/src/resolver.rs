//! Entity resolution via remote equality search.

use std::sync::Arc;

use tracing::debug;

use hubsync_client::RequestExecutor;
use hubsync_types::{EntityKind, LookupPolicy, LookupSpec, TransformedPayload};

use crate::error::{EngineError, EngineResult};

/// Resolves a transformed payload to an existing remote entity id.
pub struct EntityResolver {
    executor: Arc<RequestExecutor>,
}

impl EntityResolver {
    pub fn new(executor: Arc<RequestExecutor>) -> Self {
        Self { executor }
    }

    /// Searches for an existing entity matching the payload's lookup fields.
    ///
    /// Returns `None` when no entity matches or the lookup cannot run (no
    /// fields configured, or a required field value is missing under the
    /// `All` policy).
    ///
    /// # Errors
    ///
    /// `EngineError::AmbiguousMatch` when a search returns more than one
    /// entity, and transport errors from the search call.
    pub async fn resolve(
        &self,
        kind: &EntityKind,
        payload: &TransformedPayload,
        lookup: &LookupSpec,
    ) -> EngineResult<Option<String>> {
        if lookup.is_empty() {
            return Ok(None);
        }
        match lookup.policy {
            LookupPolicy::All => self.resolve_all(kind, payload, &lookup.fields).await,
            LookupPolicy::Sequential => {
                self.resolve_sequential(kind, payload, &lookup.fields).await
            }
        }
    }

    /// Single search with every field as a conjunctive equality filter. A
    /// missing field value means the conjunction can never identify the
    /// intended entity, so the lookup is skipped.
    async fn resolve_all(
        &self,
        kind: &EntityKind,
        payload: &TransformedPayload,
        fields: &[String],
    ) -> EngineResult<Option<String>> {
        let mut filters = Vec::with_capacity(fields.len());
        for field in fields {
            match payload.property_as_str(field) {
                Some(value) => filters.push((field.clone(), value)),
                None => {
                    debug!(kind = %kind, field, "lookup field has no value, skipping resolution");
                    return Ok(None);
                }
            }
        }
        self.search_unique(kind, &filters).await
    }

    /// Fields tried one at a time in listed order; the first field that
    /// yields exactly one match wins. Fields without a value, and fields
    /// matching zero or several entities, are skipped.
    async fn resolve_sequential(
        &self,
        kind: &EntityKind,
        payload: &TransformedPayload,
        fields: &[String],
    ) -> EngineResult<Option<String>> {
        for field in fields {
            let Some(value) = payload.property_as_str(field) else {
                continue;
            };
            let filters = [(field.clone(), value)];
            match self.search_unique(kind, &filters).await {
                Ok(Some(id)) => return Ok(Some(id)),
                Ok(None) => {}
                Err(EngineError::AmbiguousMatch { fields, count, .. }) => {
                    debug!(kind = %kind, fields, count, "field not unique, trying next");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    async fn search_unique(
        &self,
        kind: &EntityKind,
        filters: &[(String, String)],
    ) -> EngineResult<Option<String>> {
        let results = self.executor.search(kind.api_path(), filters).await?;
        match results.len() {
            0 => Ok(None),
            1 => {
                let id = results[0].id.clone();
                debug!(kind = %kind, id, "resolved existing entity");
                Ok(Some(id))
            }
            count => Err(EngineError::AmbiguousMatch {
                kind: kind.to_string(),
                fields: filters
                    .iter()
                    .map(|(field, _)| field.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                count,
            }),
        }
    }
}

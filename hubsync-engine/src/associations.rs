//! Post-commit association linking.
//!
//! Associations that cannot ride along atomically with a create are linked
//! here, one PUT per requested relation. Relation labels missing from the
//! input are discovered from the remote label registry and cached per
//! (fromKind, toKind) pair for the lifetime of the linker.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use hubsync_client::{Method, RequestExecutor};
use hubsync_types::{AssociationLabel, RecordAssociation};

use crate::error::{EngineError, EngineResult};

/// Links committed entities to other remote entities.
pub struct AssociationLinker {
    executor: Arc<RequestExecutor>,
    labels: RwLock<HashMap<(String, String), AssociationLabel>>,
}

impl AssociationLinker {
    pub fn new(executor: Arc<RequestExecutor>) -> Self {
        Self {
            executor,
            labels: RwLock::new(HashMap::new()),
        }
    }

    /// Links one requested association from a committed entity.
    ///
    /// A relation label supplied on the association is used as-is; otherwise
    /// one is discovered from the remote registry.
    ///
    /// # Errors
    ///
    /// `EngineError::Association` when the target is unusable or no relation
    /// label exists for the kind pair. Transport errors pass through.
    pub async fn link(
        &self,
        from_kind: &str,
        from_id: &str,
        association: &RecordAssociation,
    ) -> EngineResult<()> {
        let to_kind = association.to.object_type.as_deref().ok_or_else(|| {
            EngineError::Association("association target has no objectType".into())
        })?;
        let to_id = association.to.id.as_deref().ok_or_else(|| {
            EngineError::Association(format!(
                "association target to {to_kind} has no id"
            ))
        })?;

        let labels = if association.types.is_empty() {
            vec![self.label_for(from_kind, to_kind).await?]
        } else {
            association.types.clone()
        };
        self.put_link(from_kind, from_id, to_kind, to_id, &labels)
            .await
    }

    /// Links with an explicitly discovered label, for follow-up relations
    /// the input record never spelled out.
    pub async fn link_discovered(
        &self,
        from_kind: &str,
        from_id: &str,
        to_kind: &str,
        to_id: &str,
    ) -> EngineResult<()> {
        let label = self.label_for(from_kind, to_kind).await?;
        self.put_link(from_kind, from_id, to_kind, to_id, &[label])
            .await
    }

    /// Remote ids of deals already associated with a contact.
    pub async fn deals_for_contact(&self, contact_id: &str) -> EngineResult<Vec<String>> {
        let url = format!(
            "{}/objects/contacts/{contact_id}/associations/deals",
            self.executor.config().v4_base_url
        );
        let response = self.executor.fetch(&url, &[]).await?;
        let ids = response
            .body
            .get("results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .filter_map(|entry| match entry.get("toObjectId") {
                        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                        Some(Value::Number(n)) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    async fn put_link(
        &self,
        from_kind: &str,
        from_id: &str,
        to_kind: &str,
        to_id: &str,
        labels: &[AssociationLabel],
    ) -> EngineResult<()> {
        let url = format!(
            "{}/objects/{from_kind}/{from_id}/associations/{to_kind}/{to_id}",
            self.executor.config().v4_base_url
        );
        let body = serde_json::to_value(labels)?;
        let response = self.executor.push(Method::PUT, &url, &body).await?;
        if response.is_success() {
            debug!(from_kind, from_id, to_kind, to_id, "linked association");
            Ok(())
        } else {
            // push soft-success statuses (409 conflict, 404 missing target)
            Err(EngineError::Association(format!(
                "link {from_kind}/{from_id} -> {to_kind}/{to_id} returned {}: {}",
                response.status, response.text
            )))
        }
    }

    /// The first relation label the remote registry defines for a kind
    /// pair, cached on success.
    async fn label_for(&self, from_kind: &str, to_kind: &str) -> EngineResult<AssociationLabel> {
        let key = (from_kind.to_string(), to_kind.to_string());
        if let Some(label) = self.labels.read().await.get(&key) {
            return Ok(label.clone());
        }

        let url = format!(
            "{}/associations/{from_kind}/{to_kind}/labels",
            self.executor.config().v4_base_url
        );
        let response = self.executor.fetch(&url, &[]).await?;
        let label = response
            .body
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .and_then(parse_label)
            .ok_or_else(|| {
                warn!(from_kind, to_kind, "no association label defined");
                EngineError::Association(format!(
                    "no association label defined for {from_kind} -> {to_kind}"
                ))
            })?;

        self.labels.write().await.insert(key, label.clone());
        Ok(label)
    }
}

/// The label registry reports `category`/`typeId`; links are requested with
/// `associationCategory`/`associationTypeId`.
fn parse_label(entry: &Value) -> Option<AssociationLabel> {
    let category = entry.get("category")?.as_str()?.to_string();
    let type_id = entry.get("typeId")?.as_i64()?;
    Some(AssociationLabel { category, type_id })
}

//! Stream-scoped upsert engine.
//!
//! One engine per input stream. Each record flows through dedup, transform,
//! resolve, commit and follow-up linking, and produces exactly one recorded
//! `Outcome`. Record-level failures become failed outcomes; only auth
//! failures and transport retry exhaustion abort the stream.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use hubsync_client::{HubConfig, Method, RequestExecutor};
use hubsync_types::{
    EntityKind, LookupPolicy, LookupSpec, NormalizedRecord, Outcome, RecordAssociation,
    TransformedPayload,
};

use crate::associations::AssociationLinker;
use crate::dedup::DedupStateStore;
use crate::error::{EngineError, EngineResult};
use crate::resolver::EntityResolver;
use crate::transform;

/// Behavioral knobs for the engine, supplied alongside the HTTP config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lookup fields per stream name. Streams without an entry fall back to
    /// the kind default (contacts resolve by email).
    pub lookup_fields: HashMap<String, Vec<String>>,
    /// Resolution policy applied to every stream.
    pub lookup_method: LookupPolicy,
    /// When set, updates never overwrite remote properties that already
    /// hold a non-null value.
    pub only_upsert_empty_fields: bool,
}

impl EngineConfig {
    /// The effective lookup spec for a stream. Stream names are compared
    /// case-insensitively, like stream routing itself.
    pub fn lookup_spec(&self, stream_name: &str, kind: &EntityKind) -> LookupSpec {
        if let Some(fields) = self.lookup_fields.get(&stream_name.to_lowercase()) {
            return LookupSpec::new(fields.clone(), self.lookup_method);
        }
        match kind {
            EntityKind::Contact => {
                LookupSpec::new(vec!["email".to_string()], self.lookup_method)
            }
            _ => LookupSpec::none(),
        }
    }
}

/// The result of a commit: the entity id plus associations still to link.
struct CommitResult {
    id: String,
    pending: Vec<RecordAssociation>,
}

/// Reconciles one stream of records against the remote CRM.
pub struct UpsertEngine {
    stream_name: String,
    kind: EntityKind,
    lookup: LookupSpec,
    config: EngineConfig,
    executor: Arc<RequestExecutor>,
    resolver: EntityResolver,
    linker: AssociationLinker,
    dedup: Arc<dyn DedupStateStore>,
}

impl UpsertEngine {
    /// Creates an engine for a stream, building its own executor.
    pub fn new(
        stream_name: &str,
        config: EngineConfig,
        hub: HubConfig,
        dedup: Arc<dyn DedupStateStore>,
    ) -> Self {
        Self::with_executor(stream_name, config, Arc::new(RequestExecutor::new(hub)), dedup)
    }

    /// Creates an engine around an existing executor, so several streams
    /// can share one token manager.
    pub fn with_executor(
        stream_name: &str,
        config: EngineConfig,
        executor: Arc<RequestExecutor>,
        dedup: Arc<dyn DedupStateStore>,
    ) -> Self {
        let kind = EntityKind::from_stream(stream_name);
        let lookup = config.lookup_spec(stream_name, &kind);
        info!(stream = stream_name, kind = %kind, "engine ready");
        Self {
            stream_name: stream_name.to_string(),
            kind,
            lookup,
            config,
            resolver: EntityResolver::new(Arc::clone(&executor)),
            linker: AssociationLinker::new(Arc::clone(&executor)),
            executor,
            dedup,
        }
    }

    /// The stream this engine serves.
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// The entity kind resolved from the stream name.
    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    /// Base URL commits for this kind go to. Marketing streams write to
    /// the marketing API, everything else to the objects API.
    fn object_base(&self, kind: &EntityKind) -> &str {
        let config = self.executor.config();
        if kind.is_marketing() {
            &config.marketing_base_url
        } else {
            &config.api_base_url
        }
    }

    /// Processes one record end to end and records its outcome.
    ///
    /// Re-delivered records (same content hash) replay the recorded outcome
    /// without any remote call, flagged as duplicates.
    ///
    /// # Errors
    ///
    /// Only run-fatal transport errors surface here; every other failure is
    /// recorded and returned as a failed `Outcome`.
    pub async fn process(&self, record: &NormalizedRecord) -> EngineResult<Outcome> {
        let hash = record.content_hash();
        if let Some(prior) = self.dedup.get(&hash).await {
            debug!(stream = self.stream_name, hash, "duplicate record, replaying outcome");
            return Ok(prior.into_duplicate());
        }

        let outcome = match self.upsert(record, &hash).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_run_fatal() => return Err(err),
            Err(err) => {
                warn!(stream = self.stream_name, hash, "record failed: {err}");
                Outcome::failure(hash, record.external_id(), err.to_string())
            }
        };
        self.dedup.put(outcome.clone()).await;
        Ok(outcome)
    }

    async fn upsert(&self, record: &NormalizedRecord, hash: &str) -> EngineResult<Outcome> {
        let mut payload = transform::transform(record, &self.kind)?;

        if payload.kind == EntityKind::Contact {
            self.ensure_custom_properties(record, &mut payload).await?;
        }

        let existing = match &payload.remote_id {
            Some(id) => Some(id.clone()),
            None => self.resolver.resolve(&payload.kind, &payload, &self.lookup).await?,
        };

        let committed = self.commit(&payload, existing).await?;
        let link_error = self.link_follow_ups(record, &payload, &committed).await?;

        Ok(Outcome::success(
            hash.to_string(),
            Some(committed.id),
            record.external_id(),
            link_error,
        ))
    }

    /// Creates or updates the remote entity.
    ///
    /// Updates strip associations (the PATCH endpoint ignores them) and
    /// leave them pending. Creates send fully specified associations
    /// atomically; the rest stay pending. A create that hits an existing
    /// entity (409) is retried as an update against the conflicting id.
    async fn commit(
        &self,
        payload: &TransformedPayload,
        existing: Option<String>,
    ) -> EngineResult<CommitResult> {
        let kind_path = payload.kind.api_path();
        let base = self.object_base(&payload.kind);

        if let Some(id) = existing {
            return self.update(payload, &id).await;
        }

        let (atomic, pending) = split_associations(&payload.associations);
        let mut body = json!({"properties": payload.properties});
        if !atomic.is_empty() {
            body["associations"] = serde_json::to_value(&atomic)?;
        }

        let url = format!("{base}/{kind_path}");
        let response = self.executor.push(Method::POST, &url, &body).await?;

        if response.status == 409 {
            if let Some(id) = parse_existing_id(&response.text) {
                info!(kind = %payload.kind, id, "create conflicted with existing entity, updating");
                return self.update(payload, &id).await;
            }
            return Err(EngineError::Commit(format!(
                "create conflicted without a recoverable id: {}",
                response.text
            )));
        }
        if !response.is_success() {
            return Err(EngineError::Commit(format!(
                "create returned {}: {}",
                response.status, response.text
            )));
        }

        let id = response.id().ok_or_else(|| {
            EngineError::Commit(format!("create response has no entity id: {}", response.text))
        })?;
        debug!(kind = %payload.kind, id, "created entity");
        Ok(CommitResult { id, pending })
    }

    async fn update(&self, payload: &TransformedPayload, id: &str) -> EngineResult<CommitResult> {
        let kind_path = payload.kind.api_path();
        let base = self.object_base(&payload.kind);
        let url = format!("{base}/{kind_path}/{id}");

        let mut properties = payload.properties.clone();
        if self.config.only_upsert_empty_fields {
            let current = self.executor.fetch(&url, &[]).await?;
            if let Some(Value::Object(existing)) = current.body.get("properties") {
                transform::apply_merge_protect(&mut properties, existing);
            }
        }

        let body = json!({"properties": properties});
        let response = self.executor.push(Method::PATCH, &url, &body).await?;
        if !response.is_success() {
            return Err(EngineError::Commit(format!(
                "update of {kind_path}/{id} returned {}: {}",
                response.status, response.text
            )));
        }
        debug!(kind = %payload.kind, id, "updated entity");
        Ok(CommitResult {
            id: response.id().unwrap_or_else(|| id.to_string()),
            pending: payload.associations.clone(),
        })
    }

    /// Links pending associations plus kind-specific follow-up relations.
    ///
    /// Link failures are partial: the commit stands, and the first failure
    /// message is carried on the outcome. Run-fatal transport errors still
    /// propagate.
    async fn link_follow_ups(
        &self,
        record: &NormalizedRecord,
        payload: &TransformedPayload,
        committed: &CommitResult,
    ) -> EngineResult<Option<String>> {
        let kind_path = payload.kind.api_path();
        let mut first_error: Option<String> = None;

        for association in &committed.pending {
            if let Err(err) = self.linker.link(kind_path, &committed.id, association).await {
                if err.is_run_fatal() {
                    return Err(err);
                }
                warn!(stream = self.stream_name, id = committed.id, "association link failed: {err}");
                first_error.get_or_insert(err.to_string());
            }
        }

        let follow_up = match payload.kind {
            EntityKind::Call => self.link_call_contact(record, &committed.id).await,
            EntityKind::Deal => self.link_deal_contact(record, &committed.id).await,
            _ => Ok(()),
        };
        if let Err(err) = follow_up {
            if err.is_run_fatal() {
                return Err(err);
            }
            warn!(stream = self.stream_name, id = committed.id, "follow-up link failed: {err}");
            first_error.get_or_insert(err.to_string());
        }

        Ok(first_error)
    }

    /// A call carrying a `contact_id` is linked to that contact and to every
    /// deal the contact is already associated with.
    async fn link_call_contact(&self, record: &NormalizedRecord, call_id: &str) -> EngineResult<()> {
        let Some(contact_id) = record.get("contact_id").and_then(value_as_id) else {
            return Ok(());
        };
        self.linker
            .link_discovered("calls", call_id, "contacts", &contact_id)
            .await?;
        for deal_id in self.linker.deals_for_contact(&contact_id).await? {
            self.linker
                .link_discovered("calls", call_id, "deals", &deal_id)
                .await?;
        }
        Ok(())
    }

    /// A deal carrying a `contact_id` or `contact_email` is linked to that
    /// contact, when one exists.
    async fn link_deal_contact(&self, record: &NormalizedRecord, deal_id: &str) -> EngineResult<()> {
        let contact_id = match record.get("contact_id").and_then(value_as_id) {
            Some(id) => Some(id),
            None => match record.get_str("contact_email") {
                Some(email) => {
                    let found = self.contact_id_by_email(email).await?;
                    if found.is_none() {
                        debug!(email, "no contact with this email, skipping deal link");
                    }
                    found
                }
                None => None,
            },
        };
        let Some(contact_id) = contact_id else {
            return Ok(());
        };
        self.linker
            .link_discovered("deals", deal_id, "contacts", &contact_id)
            .await
    }

    /// Fetches a contact by email through the id-property lookup. Absent
    /// contacts resolve to `None` rather than an error.
    async fn contact_id_by_email(&self, email: &str) -> EngineResult<Option<String>> {
        let url = format!(
            "{}/contacts/{}",
            self.executor.config().api_base_url,
            urlencoding::encode(email)
        );
        match self.executor.fetch(&url, &[("idProperty", "email")]).await {
            Ok(response) => Ok(response.id()),
            Err(err) if err.status() == Some(404) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Creates missing remote property definitions for the record's typed
    /// custom fields. Already-defined properties are left alone; a field
    /// whose definition cannot be created is dropped from the payload so
    /// the commit does not fail on an undefined property.
    async fn ensure_custom_properties(
        &self,
        record: &NormalizedRecord,
        payload: &mut TransformedPayload,
    ) -> EngineResult<()> {
        let fields = transform::parse_custom_fields(record)?;
        let base = &self.executor.config().properties_base_url;
        let kind_path = EntityKind::Contact.api_path();

        for field in fields {
            let Some(field_type) = &field.field_type else {
                continue;
            };
            let widget = transform::hubspot_field_type(field_type)?;
            let name = field.name.to_lowercase();

            let lookup_url = format!("{base}/{kind_path}/{name}");
            match self.executor.fetch(&lookup_url, &[]).await {
                Ok(_) => continue,
                Err(err) if err.status() == Some(404) => {}
                Err(err) => return Err(err.into()),
            }

            let label = field.label.clone().unwrap_or_else(|| field.name.clone());
            let body = json!({
                "name": name,
                "label": label,
                "type": field_type,
                "fieldType": widget,
                "groupName": "contactinformation",
            });
            let create_url = format!("{base}/{kind_path}");
            info!(property = name, "creating custom property definition");
            let response = self.executor.push(Method::POST, &create_url, &body).await?;
            // 409 from push means another writer created it first
            if !response.is_success() && response.status != 409 {
                warn!(
                    property = name,
                    status = response.status,
                    "custom property could not be created, dropping field: {}",
                    response.text
                );
                payload.properties.remove(&name);
            }
        }
        Ok(())
    }
}

/// Splits requested associations into those a create can carry atomically
/// (target id and relation labels both known) and those linked afterwards.
fn split_associations(
    associations: &[RecordAssociation],
) -> (Vec<RecordAssociation>, Vec<RecordAssociation>) {
    associations
        .iter()
        .cloned()
        .partition(|assoc| assoc.to.id.is_some() && !assoc.types.is_empty())
}

/// Pulls the entity id out of a conflict body shaped like
/// `"Contact already exists. Existing ID: 42"`.
fn parse_existing_id(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    let start = lowered.find("existing id:")? + "existing id:".len();
    let digits: String = lowered[start..]
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

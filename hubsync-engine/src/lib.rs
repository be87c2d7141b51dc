//! Reconciliation engine for the hubsync CRM connector.
//!
//! # Architecture
//!
//! - **transform**: pure per-kind mapping of normalized records into remote
//!   property schemas
//! - **EntityResolver**: equality search to find the remote entity a record
//!   refers to
//! - **UpsertEngine**: per-stream orchestration of dedup, transform,
//!   resolve, commit and follow-up linking; one `Outcome` per record
//! - **AssociationLinker**: post-commit relation linking with a cached
//!   label registry
//! - **DedupStateStore**: content-hash keyed outcome storage behind a trait
//!   so callers can persist across runs

mod associations;
mod dedup;
mod engine;
mod error;
mod resolver;
pub mod transform;

pub use associations::AssociationLinker;
pub use dedup::{DedupStateStore, MemoryDedupStore};
pub use engine::{EngineConfig, UpsertEngine};
pub use error::{EngineError, EngineResult};
pub use resolver::EntityResolver;

//! Shared-document store contract.
//!
//! The controller keeps all of its externally visible state — the runtime
//! overrides, the audit trail, the leader lease — in named documents owned
//! by the surrounding orchestrator. This crate defines the interface contract
//! those collaborators implement, together with an in-memory implementation
//! carrying the same optimistic-concurrency semantics for tests and local
//! runs. The orchestrator-backed client is out of tree.
//!
//! Writes are guarded by resource versions: an update must present the
//! version it read, and a mismatch yields [`WardenError::Conflict`] so the
//! caller can re-read and retry.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;
use warden_types::{WardenError, WardenResult};

/// A named document: string keys to string payloads, like a ConfigMap.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    /// Resource version last observed. Zero means "never stored".
    #[serde(default)]
    pub version: u64,
}

impl Document {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            labels: BTreeMap::new(),
            data: BTreeMap::new(),
            version: 0,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Store contract implemented by the orchestrator client (out of tree) and
/// by [`MemoryDocumentStore`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document, or `None` if it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> WardenResult<Option<Document>>;

    /// Create a document that must not exist yet. Returns the stored copy
    /// with its first version.
    async fn create(&self, document: Document) -> WardenResult<Document>;

    /// Replace a document. The presented `version` must match the stored
    /// one; otherwise the call fails with a conflict and the caller re-reads.
    async fn update(&self, document: Document) -> WardenResult<Document>;
}

/// Fetch a document, creating an empty one (with the given labels) when
/// absent.
pub async fn get_or_create(
    store: &dyn DocumentStore,
    namespace: &str,
    name: &str,
    labels: &BTreeMap<String, String>,
) -> WardenResult<Document> {
    if let Some(doc) = store.get(namespace, name).await? {
        return Ok(doc);
    }
    let mut doc = Document::new(namespace, name);
    doc.labels = labels.clone();
    match store.create(doc.clone()).await {
        Ok(created) => Ok(created),
        // Another writer created it between our get and create.
        Err(WardenError::Conflict { .. }) => store
            .get(namespace, name)
            .await?
            .ok_or_else(|| WardenError::NotFound(format!("{namespace}/{name}"))),
        Err(e) => Err(e),
    }
}

/// In-memory store with the contract's optimistic-concurrency semantics.
///
/// Conflict injection lets tests exercise the retry envelopes without a
/// second writer: the next `n` updates fail with a conflict before the
/// store behaves normally again.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: DashMap<String, Document>,
    injected_conflicts: AtomicU32,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` update calls fail with a write conflict.
    pub fn inject_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, namespace: &str, name: &str) -> WardenResult<Option<Document>> {
        Ok(self
            .documents
            .get(&format!("{namespace}/{name}"))
            .map(|d| d.clone()))
    }

    async fn create(&self, mut document: Document) -> WardenResult<Document> {
        let key = document.key();
        if self.documents.contains_key(&key) {
            return Err(WardenError::Conflict { resource: key });
        }
        document.version = 1;
        self.documents.insert(key.clone(), document.clone());
        debug!(document = %key, "document created");
        Ok(document)
    }

    async fn update(&self, mut document: Document) -> WardenResult<Document> {
        let key = document.key();
        if self.take_injected_conflict() {
            return Err(WardenError::Conflict { resource: key });
        }
        let mut entry = self
            .documents
            .get_mut(&key)
            .ok_or_else(|| WardenError::NotFound(key.clone()))?;
        if entry.version != document.version {
            return Err(WardenError::Conflict { resource: key });
        }
        document.version += 1;
        *entry = document.clone();
        Ok(document)
    }
}

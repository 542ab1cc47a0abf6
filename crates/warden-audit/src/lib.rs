//! Audit trail for every observable controller action.
//!
//! Three variants behind one handle: a no-op logger, an in-memory ring, and
//! the shared-document-backed logger whose append path is
//! read → parse → append → retention → conditional write, retried with
//! exponential backoff on write conflicts. Audit failures are logged and
//! swallowed; they never cascade into the pipeline.

mod retention;

pub use retention::{apply_retention, RetentionOutcome};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use warden_config::AuditConfig;
use warden_store::{get_or_create, DocumentStore};
use warden_types::{AuditEntry, AuditQuery, WardenResult};
use warden_utils::{with_conflict_retry, BackoffPolicy};

/// Handle passed to every component that emits audit entries.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Record an entry. Must not fail the caller: errors are swallowed
    /// after logging.
    async fn log(&self, entry: AuditEntry);

    /// Filtered view, newest first, with offset/limit applied after the
    /// filters.
    async fn query(&self, query: &AuditQuery) -> Vec<AuditEntry>;

    /// Apply the retention policies now. The append path also applies them
    /// inline; this is the background job's entrypoint.
    async fn run_retention(&self) -> RetentionOutcome;

    async fn entry_count(&self) -> usize;

    /// Flush and release resources at shutdown.
    async fn close(&self) {}
}

fn select(entries: &[AuditEntry], query: &AuditQuery) -> Vec<AuditEntry> {
    let mut matched: Vec<AuditEntry> = entries
        .iter()
        .filter(|e| query.matches(e))
        .cloned()
        .collect();
    matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(usize::MAX);
    matched.into_iter().skip(offset).take(limit).collect()
}

/// Discards everything.
#[derive(Debug, Default, Clone)]
pub struct NoopAuditLogger;

#[async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _entry: AuditEntry) {}

    async fn query(&self, _query: &AuditQuery) -> Vec<AuditEntry> {
        Vec::new()
    }

    async fn run_retention(&self) -> RetentionOutcome {
        RetentionOutcome::default()
    }

    async fn entry_count(&self) -> usize {
        0
    }
}

/// In-memory ring, bounded by the same retention function as the document
/// variant.
pub struct MemoryAuditLogger {
    config: AuditConfig,
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditLogger {
    pub fn new(config: AuditConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AuditLogger for MemoryAuditLogger {
    async fn log(&self, entry: AuditEntry) {
        let mut entries = self.entries.write().expect("audit lock");
        entries.push(entry);
        apply_retention(&mut entries, &self.config, Utc::now());
    }

    async fn query(&self, query: &AuditQuery) -> Vec<AuditEntry> {
        select(&self.entries.read().expect("audit lock"), query)
    }

    async fn run_retention(&self) -> RetentionOutcome {
        let mut entries = self.entries.write().expect("audit lock");
        apply_retention(&mut entries, &self.config, Utc::now())
    }

    async fn entry_count(&self) -> usize {
        self.entries.read().expect("audit lock").len()
    }
}

/// Shared-document-backed audit log.
///
/// The whole trail lives as a JSON array under one data key of a named
/// document, created lazily with controller-identifying labels.
pub struct DocumentAuditLogger {
    store: Arc<dyn DocumentStore>,
    namespace: String,
    config: AuditConfig,
    policy: BackoffPolicy,
    labels: BTreeMap<String, String>,
}

impl DocumentAuditLogger {
    pub fn new(store: Arc<dyn DocumentStore>, namespace: impl Into<String>, config: AuditConfig) -> Self {
        let labels = BTreeMap::from([
            (
                "app.kubernetes.io/managed-by".to_string(),
                "warden".to_string(),
            ),
            (
                "app.kubernetes.io/component".to_string(),
                "audit-log".to_string(),
            ),
        ]);
        Self {
            store,
            namespace: namespace.into(),
            config,
            policy: BackoffPolicy::audit(),
            labels,
        }
    }

    async fn mutate_entries<F>(&self, mutate: F) -> WardenResult<RetentionOutcome>
    where
        F: Fn(&mut Vec<AuditEntry>) + Send + Sync,
    {
        with_conflict_retry(&self.config.document_name, &self.policy, |_attempt| {
            let mutate = &mutate;
            async move {
                let mut doc = get_or_create(
                    self.store.as_ref(),
                    &self.namespace,
                    &self.config.document_name,
                    &self.labels,
                )
                .await?;

                let mut entries: Vec<AuditEntry> = match doc.data.get(&self.config.document_key) {
                    Some(raw) if !raw.is_empty() => serde_json::from_str(raw).unwrap_or_else(|e| {
                        warn!(error = %e, "audit document unreadable, starting fresh");
                        Vec::new()
                    }),
                    _ => Vec::new(),
                };

                mutate(&mut entries);
                let outcome = apply_retention(&mut entries, &self.config, Utc::now());

                doc.data.insert(
                    self.config.document_key.clone(),
                    serde_json::to_string(&entries)?,
                );
                self.store.update(doc).await?;
                Ok(outcome)
            }
        })
        .await
    }

    async fn read_entries(&self) -> Vec<AuditEntry> {
        let doc = match self
            .store
            .get(&self.namespace, &self.config.document_name)
            .await
        {
            Ok(Some(doc)) => doc,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "audit document read failed");
                return Vec::new();
            }
        };
        doc.data
            .get(&self.config.document_key)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditLogger for DocumentAuditLogger {
    async fn log(&self, entry: AuditEntry) {
        let action = entry.action.clone();
        if let Err(e) = self.mutate_entries(move |entries| entries.push(entry.clone())).await {
            // Audit failures never cascade.
            warn!(error = %e, action = %action, "audit append failed");
        } else {
            debug!(action = %action, "audit entry recorded");
        }
    }

    async fn query(&self, query: &AuditQuery) -> Vec<AuditEntry> {
        select(&self.read_entries().await, query)
    }

    async fn run_retention(&self) -> RetentionOutcome {
        match self.mutate_entries(|_| {}).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "audit retention failed");
                RetentionOutcome::default()
            }
        }
    }

    async fn entry_count(&self) -> usize {
        self.read_entries().await.len()
    }
}

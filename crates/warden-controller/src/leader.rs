//! Leader election over a lease document.
//!
//! One lease document in the target namespace holds the current holder and
//! its renewal time. Instances try to acquire or renew on a fixed cadence;
//! only the holder drives writes to the overrides document. Losing a write
//! race simply means another instance leads.

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use warden_config::LeaderElectionConfig;
use warden_store::{Document, DocumentStore};
use warden_types::{WardenError, WardenResult};

const HOLDER_KEY: &str = "holder";
const RENEWED_KEY: &str = "renewed_at";

pub struct LeaderElector {
    store: Arc<dyn DocumentStore>,
    namespace: String,
    config: LeaderElectionConfig,
    identity: String,
    is_leader: Arc<AtomicBool>,
}

impl LeaderElector {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        namespace: impl Into<String>,
        config: LeaderElectionConfig,
    ) -> Self {
        let identity = config
            .identity
            .clone()
            .unwrap_or_else(|| format!("warden-{}", uuid::Uuid::new_v4()));
        Self {
            store,
            namespace: namespace.into(),
            config,
            identity,
            is_leader: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag the reconciler consults before writing.
    pub fn leadership_flag(&self) -> Arc<AtomicBool> {
        self.is_leader.clone()
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// One acquire-or-renew attempt. Updates the shared flag and returns the
    /// current leadership state.
    pub async fn try_acquire_or_renew(&self) -> bool {
        let leader = match self.attempt().await {
            Ok(leader) => leader,
            Err(WardenError::Conflict { .. }) => {
                debug!("lost lease write race");
                false
            }
            Err(e) => {
                warn!(error = %e, "leader election attempt failed");
                false
            }
        };

        let was_leader = self.is_leader.swap(leader, Ordering::SeqCst);
        if leader && !was_leader {
            info!(identity = %self.identity, "acquired leadership");
        } else if !leader && was_leader {
            warn!(identity = %self.identity, "lost leadership");
        }
        leader
    }

    async fn attempt(&self) -> WardenResult<bool> {
        let now = Utc::now();
        let existing = self
            .store
            .get(&self.namespace, &self.config.lease_document)
            .await?;

        match existing {
            None => {
                let mut doc = Document::new(&self.namespace, &self.config.lease_document);
                self.stamp(&mut doc, now);
                self.store.create(doc).await?;
                Ok(true)
            }
            Some(mut doc) => {
                let holder = doc.data.get(HOLDER_KEY).cloned().unwrap_or_default();
                let renewed_at = doc
                    .data
                    .get(RENEWED_KEY)
                    .and_then(|raw| raw.parse::<DateTime<Utc>>().ok());
                let expired = renewed_at
                    .map(|t| now - t > Duration::seconds(self.config.lease_duration_secs as i64))
                    .unwrap_or(true);

                if holder == self.identity || expired {
                    self.stamp(&mut doc, now);
                    self.store.update(doc).await?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    fn stamp(&self, doc: &mut Document, now: DateTime<Utc>) {
        doc.data.insert(HOLDER_KEY.to_string(), self.identity.clone());
        doc.data.insert(RENEWED_KEY.to_string(), now.to_rfc3339());
        doc.data.insert(
            "lease_duration_secs".to_string(),
            self.config.lease_duration_secs.to_string(),
        );
    }
}

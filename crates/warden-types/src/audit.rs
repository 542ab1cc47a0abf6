use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Well-known audit action names.
///
/// Actions are open-ended strings so new components can log without a type
/// change; these constants cover the actions the pipeline itself emits.
pub mod actions {
    pub const LIMITS_APPLIED: &str = "limits-applied";
    pub const LIMITS_PREVIEWED: &str = "limits-previewed";
    pub const SPIKE_DETECTED: &str = "spike-detected";
    pub const BUDGET_VIOLATION: &str = "budget-violation";
    pub const BLAST_DETECTED: &str = "blast-detected";
    pub const CIRCUIT_TRANSITION: &str = "circuit-transition";
    pub const ROLLBACK: &str = "rollback";
    pub const RECONCILE_FAILED: &str = "reconcile-failed";
    pub const RETENTION_CLEANUP: &str = "retention-cleanup";
}

/// One observable action taken by the controller. Immutable once logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Tenant the action applied to; empty for process-wide actions.
    #[serde(default)]
    pub tenant: String,
    pub action: String,
    #[serde(default)]
    pub reason: String,
    /// Names of the keys that changed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub old_values: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub new_values: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub source: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl AuditEntry {
    pub fn new(component: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            tenant: String::new(),
            action: action.into(),
            reason: String::new(),
            changes: Vec::new(),
            old_values: BTreeMap::new(),
            new_values: BTreeMap::new(),
            source: String::new(),
            success: true,
            error: None,
            component: component.into(),
            user: None,
        }
    }

    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = tenant.into();
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn change(
        mut self,
        key: impl Into<String>,
        old: Option<serde_json::Value>,
        new: serde_json::Value,
    ) -> Self {
        let key = key.into();
        self.changes.push(key.clone());
        if let Some(old) = old {
            self.old_values.insert(key.clone(), old);
        }
        self.new_values.insert(key, new);
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Filter parameters for audit queries (API list endpoint).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl AuditQuery {
    /// Whether an entry passes every set filter.
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(tenant) = &self.tenant {
            if &entry.tenant != tenant {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if &entry.action != action {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp > until {
                return false;
            }
        }
        if let Some(success) = self.success {
            if entry.success != success {
                return false;
            }
        }
        true
    }
}

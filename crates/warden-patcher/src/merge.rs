//! Pure merge of computed limits into the overrides document.
//!
//! The document is `{ overrides: { tenant: { limit: value, ... } } }`. The
//! merge only ever touches keys this controller owns and only for tenants it
//! produced limits for: every other key — including limits on the same
//! tenant managed by someone else — survives byte-for-byte.

use chrono::{DateTime, Utc};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use warden_types::{LimitValue, TenantLimits, WardenError, WardenResult};

/// Reserved per-tenant key carrying controller metadata.
pub const METADATA_KEY: &str = "# metadata";
const OVERRIDES_KEY: &str = "overrides";

/// One key update performed by a merge, for audit records.
#[derive(Debug, Clone)]
pub struct KeyChange {
    pub tenant: String,
    pub key: String,
    pub old: Option<Value>,
    pub new: Value,
}

/// Result of merging limits into a document.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The projected document content.
    pub content: String,
    pub changes: Vec<KeyChange>,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn tenants_touched(&self) -> usize {
        let mut tenants: Vec<&str> = self.changes.iter().map(|c| c.tenant.as_str()).collect();
        tenants.sort_unstable();
        tenants.dedup();
        tenants.len()
    }
}

/// Merge `limits` into the existing overrides content.
///
/// `should_write` gates each limit key (the definition must exist and be
/// enabled); zero values and unchanged values are skipped. When a tenant
/// picks up at least one change its metadata block is rewritten, otherwise
/// the tenant block — metadata included — is left untouched, which keeps a
/// repeated apply byte-identical.
pub fn merge_limits(
    existing_content: &str,
    limits: &BTreeMap<String, TenantLimits>,
    should_write: impl Fn(&str, &str) -> bool,
    now: DateTime<Utc>,
    source: &str,
) -> WardenResult<MergeOutcome> {
    let mut root = parse_root(existing_content)?;

    let overrides_key = Value::String(OVERRIDES_KEY.to_string());
    let mut overrides = match root.remove(&overrides_key) {
        Some(Value::Mapping(m)) => m,
        Some(other) => {
            return Err(WardenError::Parse(format!(
                "overrides section is not a mapping: {other:?}"
            )))
        }
        None => Mapping::new(),
    };

    let mut changes = Vec::new();
    for (tenant, tenant_limits) in limits {
        let tenant_key = Value::String(tenant.clone());
        let mut block = match overrides.remove(&tenant_key) {
            Some(Value::Mapping(m)) => m,
            _ => Mapping::new(),
        };

        let mut updated_keys = Vec::new();
        for (name, value) in &tenant_limits.limits {
            if !should_write(tenant, name) || value.is_zero() {
                continue;
            }
            let new_value = to_yaml(value)?;
            let key = Value::String(name.clone());
            let old = block.get(&key).cloned();
            if old.as_ref() == Some(&new_value) {
                continue;
            }
            block.insert(key, new_value.clone());
            updated_keys.push(name.clone());
            changes.push(KeyChange {
                tenant: tenant.clone(),
                key: name.clone(),
                old,
                new: new_value,
            });
        }

        if !updated_keys.is_empty() {
            block.insert(
                Value::String(METADATA_KEY.to_string()),
                metadata_block(&updated_keys, &tenant_limits.reason, source, now),
            );
        }

        if !block.is_empty() {
            overrides.insert(tenant_key, Value::Mapping(block));
        }
    }

    root.insert(overrides_key, Value::Mapping(overrides));
    let content = serde_yaml::to_string(&Value::Mapping(root))?;
    Ok(MergeOutcome { content, changes })
}

/// The document's current `tenant → limits` view, metadata stripped.
pub fn current_limits(content: &str) -> WardenResult<BTreeMap<String, BTreeMap<String, LimitValue>>> {
    let root = parse_root(content)?;
    let Some(Value::Mapping(overrides)) = root.get(OVERRIDES_KEY) else {
        return Ok(BTreeMap::new());
    };

    let mut result = BTreeMap::new();
    for (tenant, block) in overrides {
        let (Some(tenant), Value::Mapping(block)) = (tenant.as_str(), block) else {
            continue;
        };
        let mut limits = BTreeMap::new();
        for (key, value) in block {
            let Some(key) = key.as_str() else { continue };
            if key == METADATA_KEY {
                continue;
            }
            if let Some(limit) = from_yaml(value) {
                limits.insert(key.to_string(), limit);
            }
        }
        result.insert(tenant.to_string(), limits);
    }
    Ok(result)
}

fn parse_root(content: &str) -> WardenResult<Mapping> {
    if content.trim().is_empty() {
        return Ok(Mapping::new());
    }
    match serde_yaml::from_str::<Value>(content)? {
        Value::Mapping(m) => Ok(m),
        Value::Null => Ok(Mapping::new()),
        other => Err(WardenError::Parse(format!(
            "overrides document root is not a mapping: {other:?}"
        ))),
    }
}

fn metadata_block(updated: &[String], reason: &str, source: &str, now: DateTime<Utc>) -> Value {
    let mut metadata = Mapping::new();
    metadata.insert(
        Value::String("managed_by".into()),
        Value::String("warden".into()),
    );
    metadata.insert(
        Value::String("updated_at".into()),
        Value::String(now.to_rfc3339()),
    );
    metadata.insert(
        Value::String("updated_keys".into()),
        Value::Sequence(updated.iter().map(|k| Value::String(k.clone())).collect()),
    );
    metadata.insert(
        Value::String("reason".into()),
        Value::String(reason.to_string()),
    );
    metadata.insert(
        Value::String("source".into()),
        Value::String(source.to_string()),
    );
    Value::Mapping(metadata)
}

fn to_yaml(value: &LimitValue) -> WardenResult<Value> {
    Ok(serde_yaml::to_value(value)?)
}

fn from_yaml(value: &Value) -> Option<LimitValue> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(LimitValue::Count(i))
            } else {
                n.as_f64().map(LimitValue::Rate)
            }
        }
        Value::String(s) => Some(LimitValue::Duration(s.clone())),
        _ => None,
    }
}

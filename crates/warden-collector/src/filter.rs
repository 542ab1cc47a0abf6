//! Sample admission: which metric families are retained and which label
//! names a tenant identity may hide behind.

use std::collections::BTreeMap;

/// Label names that identify the owning tenant, checked in order.
pub const TENANT_LABELS: [&str; 3] = ["user", "tenant", "tenant_id"];

/// Metric families retained by exact name.
const ALLOWED_METRICS: [&str; 6] = [
    "cortex_distributor_received_samples_total",
    "cortex_distributor_samples_in_total",
    "cortex_ingester_memory_series",
    "cortex_ingester_active_series",
    "cortex_querier_series_fetched",
    "cortex_query_frontend_queries_total",
];

/// Component and engine prefixes retained wholesale.
const ALLOWED_PREFIXES: [&str; 10] = [
    "cortex_distributor_",
    "cortex_ingester_",
    "cortex_querier_",
    "cortex_query_frontend_",
    "cortex_ruler_",
    "cortex_compactor_",
    "mimir_",
    "thanos_",
    "prometheus_tsdb_",
    "loki_",
];

/// Whether a metric family is interesting to the analyzer.
pub fn metric_allowed(name: &str) -> bool {
    ALLOWED_METRICS.contains(&name) || ALLOWED_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Extract the tenant identity from a sample's labels. Samples without a
/// tenant label are dropped by the collector.
pub fn tenant_of(labels: &BTreeMap<String, String>) -> Option<&str> {
    TENANT_LABELS
        .iter()
        .find_map(|key| labels.get(*key))
        .map(String::as_str)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_and_prefixes() {
        assert!(metric_allowed("cortex_distributor_received_samples_total"));
        assert!(metric_allowed("cortex_ruler_evaluations_total"));
        assert!(metric_allowed("mimir_anything_at_all"));
        assert!(!metric_allowed("go_goroutines"));
        assert!(!metric_allowed("process_cpu_seconds_total"));
    }

    #[test]
    fn tenant_label_precedence() {
        let labels = BTreeMap::from([
            ("tenant".to_string(), "beta".to_string()),
            ("user".to_string(), "alpha".to_string()),
        ]);
        // `user` is checked before `tenant`.
        assert_eq!(tenant_of(&labels), Some("alpha"));

        let labels = BTreeMap::from([("tenant_id".to_string(), "gamma".to_string())]);
        assert_eq!(tenant_of(&labels), Some("gamma"));
    }

    #[test]
    fn missing_or_empty_tenant_is_none() {
        assert_eq!(tenant_of(&BTreeMap::new()), None);
        let labels = BTreeMap::from([("user".to_string(), String::new())]);
        assert_eq!(tenant_of(&labels), None);
    }
}

//! Deterministic synthetic workload for environments without live sources.
//!
//! Magnitudes are fixed per tenant index so tests and demo runs see stable,
//! predictable recommendations.

use chrono::Utc;
use std::collections::BTreeMap;
use warden_types::{Sample, TenantMetrics};

const SYNTHETIC_SOURCE: &str = "synthetic";

/// Metric families emitted for every synthetic tenant, with their base
/// magnitude. Tenant `N` scales each base by `N + 1`.
const SYNTHETIC_SERIES: [(&str, f64); 4] = [
    ("cortex_distributor_received_samples_total", 10_000.0),
    ("cortex_ingester_memory_series", 50_000.0),
    ("cortex_querier_series_fetched", 5_000.0),
    ("cortex_query_frontend_queries_total", 100.0),
];

/// Fabricate `synthetic-tenant-N` entries with known magnitudes.
pub fn generate(tenant_count: usize) -> BTreeMap<String, TenantMetrics> {
    let now = Utc::now();
    let mut result = BTreeMap::new();

    for n in 0..tenant_count {
        let tenant = format!("synthetic-tenant-{n}");
        let mut metrics = TenantMetrics::new(&tenant);
        let scale = (n + 1) as f64;

        for (metric, base) in SYNTHETIC_SERIES {
            metrics.push(
                Sample::new(&tenant, metric, base * scale)
                    .with_timestamp(now)
                    .with_source(SYNTHETIC_SOURCE)
                    .with_label("user", &tenant),
            );
        }
        result.insert(tenant, metrics);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_scaled_tenants() {
        let tenants = generate(3);
        assert_eq!(tenants.len(), 3);

        let t0 = &tenants["synthetic-tenant-0"];
        let t2 = &tenants["synthetic-tenant-2"];
        assert_eq!(
            t0.latest_value("cortex_distributor_received_samples_total"),
            Some(10_000.0)
        );
        assert_eq!(
            t2.latest_value("cortex_distributor_received_samples_total"),
            Some(30_000.0)
        );
    }

    #[test]
    fn zero_count_is_empty() {
        assert!(generate(0).is_empty());
    }
}

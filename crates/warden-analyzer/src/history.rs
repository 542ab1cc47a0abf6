//! Per-(tenant, metric) sample history.
//!
//! The analyzer owns this store; every access happens inside its lock.
//! Sequences stay timestamp-sorted, are truncated to twice the analysis
//! window on ingest, and whole tenants are evicted once they go quiet for
//! the inactive TTL.

use std::collections::{BTreeMap, HashMap};
use warden_types::{Sample, TenantMetrics};

#[derive(Debug, Default)]
pub struct HistoryStore {
    tenants: HashMap<String, TenantHistory>,
}

#[derive(Debug, Default)]
struct TenantHistory {
    metrics: HashMap<String, Vec<Sample>>,
    last_seen_ms: u64,
}

impl HistoryStore {
    /// Fold a collection pass into history.
    ///
    /// Samples at or before a series' newest timestamp are ignored, so
    /// re-ingesting the same pass is a no-op.
    pub fn ingest(
        &mut self,
        metrics: &BTreeMap<String, TenantMetrics>,
        now_ms: u64,
        retain_ms: u64,
    ) {
        for (tenant, tm) in metrics {
            let entry = self.tenants.entry(tenant.clone()).or_default();
            entry.last_seen_ms = now_ms;

            for (metric, samples) in &tm.metrics {
                let series = entry.metrics.entry(metric.clone()).or_default();
                let newest = series
                    .last()
                    .map(|s| s.timestamp.timestamp_millis())
                    .unwrap_or(i64::MIN);
                for sample in samples {
                    if sample.timestamp.timestamp_millis() > newest {
                        series.push(sample.clone());
                    }
                }

                let cutoff = now_ms.saturating_sub(retain_ms) as i64;
                series.retain(|s| s.timestamp.timestamp_millis() >= cutoff);
            }
        }
    }

    /// Values for one series no older than `window_ms`, oldest first.
    pub fn window_values(&self, tenant: &str, metric: &str, now_ms: u64, window_ms: u64) -> Vec<f64> {
        let cutoff = now_ms.saturating_sub(window_ms) as i64;
        self.series(tenant, metric)
            .map(|series| {
                series
                    .iter()
                    .filter(|s| s.timestamp.timestamp_millis() >= cutoff)
                    .map(|s| s.value)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Values strictly older than `age_ms`, oldest first. Used for spike
    /// baselines.
    pub fn values_older_than(&self, tenant: &str, metric: &str, now_ms: u64, age_ms: u64) -> Vec<f64> {
        let cutoff = now_ms.saturating_sub(age_ms) as i64;
        self.series(tenant, metric)
            .map(|series| {
                series
                    .iter()
                    .filter(|s| s.timestamp.timestamp_millis() < cutoff)
                    .map(|s| s.value)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn latest_value(&self, tenant: &str, metric: &str) -> Option<f64> {
        self.series(tenant, metric)
            .and_then(|s| s.last())
            .map(|s| s.value)
    }

    pub fn metric_names(&self, tenant: &str) -> Vec<String> {
        self.tenants
            .get(tenant)
            .map(|t| t.metrics.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn tenant_names(&self) -> Vec<String> {
        self.tenants.keys().cloned().collect()
    }

    pub fn last_seen_ms(&self, tenant: &str) -> Option<u64> {
        self.tenants.get(tenant).map(|t| t.last_seen_ms)
    }

    /// Discard tenants with no samples for `ttl_ms`. Returns the evicted
    /// tenant names.
    pub fn evict_inactive(&mut self, now_ms: u64, ttl_ms: u64) -> Vec<String> {
        let cutoff = now_ms.saturating_sub(ttl_ms);
        let evicted: Vec<String> = self
            .tenants
            .iter()
            .filter(|(_, h)| h.last_seen_ms < cutoff)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &evicted {
            self.tenants.remove(name);
        }
        evicted
    }

    fn series(&self, tenant: &str, metric: &str) -> Option<&Vec<Sample>> {
        self.tenants.get(tenant).and_then(|t| t.metrics.get(metric))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const MINUTE_MS: u64 = 60_000;

    fn sample_at(tenant: &str, metric: &str, value: f64, ms: u64) -> Sample {
        Sample::new(tenant, metric, value)
            .with_timestamp(Utc.timestamp_millis_opt(ms as i64).single().unwrap())
    }

    fn pass(samples: Vec<Sample>) -> BTreeMap<String, TenantMetrics> {
        let mut map: BTreeMap<String, TenantMetrics> = BTreeMap::new();
        for s in samples {
            map.entry(s.tenant.clone())
                .or_insert_with(|| TenantMetrics::new(&s.tenant))
                .push(s);
        }
        map
    }

    #[test]
    fn ingest_is_idempotent_per_pass() {
        let mut store = HistoryStore::default();
        let now = 100 * MINUTE_MS;
        let metrics = pass(vec![
            sample_at("t1", "m", 1.0, now - MINUTE_MS),
            sample_at("t1", "m", 2.0, now),
        ]);

        store.ingest(&metrics, now, 60 * MINUTE_MS);
        store.ingest(&metrics, now, 60 * MINUTE_MS);

        assert_eq!(
            store.window_values("t1", "m", now, 10 * MINUTE_MS),
            vec![1.0, 2.0]
        );
    }

    #[test]
    fn old_samples_pruned_on_ingest() {
        let mut store = HistoryStore::default();
        let now = 200 * MINUTE_MS;
        store.ingest(
            &pass(vec![sample_at("t1", "m", 1.0, now - 100 * MINUTE_MS)]),
            now - 90 * MINUTE_MS,
            60 * MINUTE_MS,
        );
        store.ingest(
            &pass(vec![sample_at("t1", "m", 2.0, now)]),
            now,
            60 * MINUTE_MS,
        );

        // The first sample aged past the retention horizon.
        assert_eq!(
            store.window_values("t1", "m", now, 200 * MINUTE_MS),
            vec![2.0]
        );
    }

    #[test]
    fn window_and_baseline_split() {
        let mut store = HistoryStore::default();
        let now = 100 * MINUTE_MS;
        store.ingest(
            &pass(vec![
                sample_at("t1", "m", 1.0, now - 30 * MINUTE_MS),
                sample_at("t1", "m", 2.0, now - 20 * MINUTE_MS),
                sample_at("t1", "m", 3.0, now - 5 * MINUTE_MS),
            ]),
            now,
            60 * MINUTE_MS,
        );

        assert_eq!(
            store.window_values("t1", "m", now, 10 * MINUTE_MS),
            vec![3.0]
        );
        assert_eq!(
            store.values_older_than("t1", "m", now, 10 * MINUTE_MS),
            vec![1.0, 2.0]
        );
        assert_eq!(store.latest_value("t1", "m"), Some(3.0));
    }

    #[test]
    fn inactive_tenants_evicted() {
        let mut store = HistoryStore::default();
        let start = 10 * MINUTE_MS;
        store.ingest(&pass(vec![sample_at("gone", "m", 1.0, start)]), start, u64::MAX / 2);
        store.ingest(
            &pass(vec![sample_at("alive", "m", 1.0, start + 50 * MINUTE_MS)]),
            start + 50 * MINUTE_MS,
            u64::MAX / 2,
        );

        let evicted = store.evict_inactive(start + 50 * MINUTE_MS, 30 * MINUTE_MS);
        assert_eq!(evicted, vec!["gone".to_string()]);
        assert_eq!(store.tenant_names(), vec!["alive".to_string()]);
    }
}

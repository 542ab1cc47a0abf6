use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single observed metric value for a tenant.
///
/// Samples are immutable once produced by the collector; the analyzer copies
/// them into its history store and never mutates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub tenant: String,
    pub metric_name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Scrape source URL the sample came from.
    pub source: String,
}

impl Sample {
    pub fn new(tenant: impl Into<String>, metric_name: impl Into<String>, value: f64) -> Self {
        Self {
            tenant: tenant.into(),
            metric_name: metric_name.into(),
            value,
            timestamp: Utc::now(),
            labels: BTreeMap::new(),
            source: String::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// All samples observed for one tenant in the current tick, keyed by metric.
///
/// Sample sequences are kept in timestamp order; [`TenantMetrics::push`]
/// appends and keeps `last_update` at the most recent source time seen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantMetrics {
    pub tenant: String,
    pub metrics: BTreeMap<String, Vec<Sample>>,
    pub last_update: Option<DateTime<Utc>>,
}

impl TenantMetrics {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            metrics: BTreeMap::new(),
            last_update: None,
        }
    }

    /// Append a sample, keeping per-metric ordering and `last_update`.
    pub fn push(&mut self, sample: Sample) {
        let newer = self
            .last_update
            .map(|t| sample.timestamp > t)
            .unwrap_or(true);
        if newer {
            self.last_update = Some(sample.timestamp);
        }

        let series = self.metrics.entry(sample.metric_name.clone()).or_default();
        // Samples from multiple sources may interleave out of order.
        match series.last() {
            Some(last) if last.timestamp > sample.timestamp => {
                let idx = series.partition_point(|s| s.timestamp <= sample.timestamp);
                series.insert(idx, sample);
            }
            _ => series.push(sample),
        }
    }

    /// Most recent sample for a metric, if any.
    pub fn latest(&self, metric: &str) -> Option<&Sample> {
        self.metrics.get(metric).and_then(|s| s.last())
    }

    /// Most recent value for a metric, if any.
    pub fn latest_value(&self, metric: &str) -> Option<f64> {
        self.latest(metric).map(|s| s.value)
    }

    pub fn sample_count(&self) -> usize {
        self.metrics.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn push_tracks_last_update() {
        let now = Utc::now();
        let mut tm = TenantMetrics::new("t1");
        tm.push(Sample::new("t1", "samples_total", 10.0).with_timestamp(now));
        tm.push(
            Sample::new("t1", "samples_total", 5.0).with_timestamp(now - Duration::seconds(30)),
        );

        assert_eq!(tm.last_update, Some(now));
        assert_eq!(tm.sample_count(), 2);
    }

    #[test]
    fn push_keeps_timestamp_order() {
        let now = Utc::now();
        let mut tm = TenantMetrics::new("t1");
        tm.push(Sample::new("t1", "m", 3.0).with_timestamp(now));
        tm.push(Sample::new("t1", "m", 1.0).with_timestamp(now - Duration::seconds(20)));
        tm.push(Sample::new("t1", "m", 2.0).with_timestamp(now - Duration::seconds(10)));

        let values: Vec<f64> = tm.metrics["m"].iter().map(|s| s.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
        assert_eq!(tm.latest_value("m"), Some(3.0));
    }

    #[test]
    fn latest_on_missing_metric_is_none() {
        let tm = TenantMetrics::new("t1");
        assert!(tm.latest("absent").is_none());
        assert!(tm.is_empty());
    }
}

//! The shared retention function: time, then count, then size.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use warden_config::AuditConfig;
use warden_types::AuditEntry;

/// What one retention application removed.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RetentionOutcome {
    pub removed_by_time: usize,
    pub removed_by_count: usize,
    pub removed_by_size: usize,
    /// Set when the size policy had to trim below the emergency threshold.
    pub emergency: bool,
}

impl RetentionOutcome {
    pub fn removed_total(&self) -> usize {
        self.removed_by_time + self.removed_by_count + self.removed_by_size
    }

    pub fn is_noop(&self) -> bool {
        self.removed_total() == 0
    }
}

/// Apply the three policies in order to a timestamp-ascending entry list.
///
/// 1. Time: drop entries at or past the retention horizon.
/// 2. Count: keep only the newest `max_entries`.
/// 3. Size: if the serialized form exceeds `max_size_bytes`, drop oldest
///    entries until the running size is at or below
///    `max_size_bytes × emergency_threshold_pct / 100`, and flag the
///    cleanup as an emergency.
pub fn apply_retention(
    entries: &mut Vec<AuditEntry>,
    config: &AuditConfig,
    now: DateTime<Utc>,
) -> RetentionOutcome {
    let mut outcome = RetentionOutcome::default();

    entries.sort_by_key(|e| e.timestamp);

    let horizon = now - Duration::seconds(config.retention_secs as i64);
    let before = entries.len();
    entries.retain(|e| e.timestamp > horizon);
    outcome.removed_by_time = before - entries.len();

    if entries.len() > config.max_entries {
        let excess = entries.len() - config.max_entries;
        entries.drain(..excess);
        outcome.removed_by_count = excess;
    }

    let sizes: Vec<usize> = entries
        .iter()
        .map(|e| serde_json::to_vec(e).map(|v| v.len()).unwrap_or(0))
        .collect();
    // Array overhead: brackets plus one separator per entry.
    let mut total: usize = sizes.iter().sum::<usize>() + entries.len() + 1;
    if total > config.max_size_bytes {
        let target =
            (config.max_size_bytes as f64 * config.emergency_threshold_pct / 100.0) as usize;
        let mut drop = 0;
        while total > target && drop < entries.len() {
            total -= sizes[drop] + 1;
            drop += 1;
        }
        entries.drain(..drop);
        outcome.removed_by_size = drop;
        outcome.emergency = true;
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::actions;

    fn entry_at(now: DateTime<Utc>, age_secs: i64) -> AuditEntry {
        let mut entry = AuditEntry::new("test", actions::LIMITS_APPLIED);
        entry.timestamp = now - Duration::seconds(age_secs);
        entry
    }

    fn config() -> AuditConfig {
        AuditConfig {
            max_entries: 100,
            max_size_bytes: 800 * 1024,
            retention_secs: 3_600,
            emergency_threshold_pct: 90.0,
            ..Default::default()
        }
    }

    #[test]
    fn time_policy_drops_expired() {
        let now = Utc::now();
        let mut entries = vec![
            entry_at(now, 4_000),
            entry_at(now, 3_601),
            entry_at(now, 100),
        ];
        let outcome = apply_retention(&mut entries, &config(), now);

        assert_eq!(outcome.removed_by_time, 2);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].timestamp > now - Duration::seconds(3_600));
    }

    #[test]
    fn count_policy_keeps_newest() {
        let now = Utc::now();
        let config = AuditConfig {
            max_entries: 3,
            ..config()
        };
        let mut entries: Vec<AuditEntry> = (0..10).map(|i| entry_at(now, 10 * i)).collect();
        let outcome = apply_retention(&mut entries, &config, now);

        assert_eq!(outcome.removed_by_count, 7);
        assert_eq!(entries.len(), 3);
        // The newest three survive: ages 0, 10, 20 seconds.
        assert!(entries.iter().all(|e| e.timestamp >= now - Duration::seconds(20)));
    }

    #[test]
    fn zero_max_entries_empties_the_log() {
        let now = Utc::now();
        let config = AuditConfig {
            max_entries: 0,
            ..config()
        };
        let mut entries = vec![entry_at(now, 1)];
        apply_retention(&mut entries, &config, now);
        assert!(entries.is_empty());
    }

    #[test]
    fn size_policy_trims_to_emergency_threshold() {
        let now = Utc::now();
        let config = AuditConfig {
            max_entries: 100_000,
            max_size_bytes: 8 * 1024,
            emergency_threshold_pct: 90.0,
            retention_secs: 86_400,
            ..Default::default()
        };

        // Pad entries so each serializes to a few hundred bytes.
        let mut entries: Vec<AuditEntry> = (0..200)
            .map(|i| {
                let mut e = entry_at(now, i);
                e.reason = "x".repeat(200);
                e
            })
            .collect();
        let outcome = apply_retention(&mut entries, &config, now);

        assert!(outcome.emergency);
        assert!(outcome.removed_by_size > 0);
        let serialized = serde_json::to_vec(&entries).unwrap();
        assert!(
            serialized.len() <= (8 * 1024) * 9 / 10,
            "size {} above emergency target",
            serialized.len()
        );
        // Oldest entries went first.
        assert!(entries.iter().all(|e| e.timestamp >= now - Duration::seconds(25)));
    }

    #[test]
    fn compliant_log_is_a_noop() {
        let now = Utc::now();
        let mut entries = vec![entry_at(now, 10), entry_at(now, 5)];
        let before = entries.clone();
        let outcome = apply_retention(&mut entries, &config(), now);

        assert!(outcome.is_noop());
        assert!(!outcome.emergency);
        assert_eq!(entries.len(), before.len());
    }
}

//! The reconciliation loop.
//!
//! One pass per tick: collect, filter, protect, cost, analyze, synthesize,
//! enforce, patch, record. Ticks never overlap — the loop runs passes
//! sequentially and a tick that fires while one is still running is skipped.
//! Non-terminal step failures are counted and the pass continues with the
//! last good intermediate; a collection or patch failure aborts the pass.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use warden_analyzer::Analyzer;
use warden_audit::AuditLogger;
use warden_collector::Collector;
use warden_config::{Mode, WardenConfig};
use warden_cost::CostController;
use warden_patcher::Patcher;
use warden_protection::BlastProtector;
use warden_types::{actions, AuditEntry, TenantMetrics, WardenResult};
use warden_utils::{Clock, TenantSelector};

use crate::alerts::AlertDispatcher;
use crate::gauges::ControllerMetrics;
use warden_api::{SharedStatus, StatusSnapshot};

pub struct Reconciler {
    pub config: WardenConfig,
    pub collector: Arc<Collector>,
    pub selector: TenantSelector,
    pub analyzer: Arc<Analyzer>,
    pub cost: Arc<CostController>,
    pub protector: Arc<BlastProtector>,
    pub patcher: Arc<Patcher>,
    pub audit: Arc<dyn AuditLogger>,
    pub alerts: Arc<AlertDispatcher>,
    pub metrics: ControllerMetrics,
    pub status: SharedStatus,
    pub clock: Arc<dyn Clock>,
    /// Set by the leader elector; non-leaders run the pipeline read-only.
    pub leadership: Arc<AtomicBool>,
}

/// Summary of one pass, for logs and tests.
#[derive(Debug, Default, Clone)]
pub struct TickReport {
    pub tenants_collected: usize,
    pub tenants_filtered: usize,
    pub tenants_processed: usize,
    pub spikes_detected: usize,
    pub blasts_detected: usize,
    pub keys_written: usize,
    pub wrote: bool,
}

impl Reconciler {
    /// Drive the loop until shutdown. `trigger_rx` lets the API force a
    /// pass between ticks.
    pub async fn run(
        &self,
        mut trigger_rx: mpsc::Receiver<()>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.update_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            interval_secs = self.config.update_interval_secs,
            mode = %self.config.mode,
            "reconciler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                Some(()) = trigger_rx.recv() => {
                    info!("reconciliation triggered via API");
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reconciler shutting down");
                        return;
                    }
                    continue;
                }
            }
            // Passes run inline: a tick firing mid-pass is skipped by the
            // interval's missed-tick behavior, so passes never overlap.
            self.run_once().await;
        }
    }

    /// One full pass with bookkeeping.
    pub async fn run_once(&self) -> Option<TickReport> {
        let started = Instant::now();
        match self.tick().await {
            Ok(report) => {
                self.metrics
                    .reconciliations_total
                    .with_label_values(&["success"])
                    .inc();
                self.metrics
                    .reconcile_duration
                    .observe(started.elapsed().as_secs_f64());
                self.protector.record_outcome(true);
                self.finish_status(|s| {
                    s.last_success = Some(chrono::Utc::now());
                    s.tenants_processed = report.tenants_processed;
                    s.tenants_filtered = report.tenants_filtered;
                    s.last_error = None;
                });
                info!(
                    tenants = report.tenants_processed,
                    filtered = report.tenants_filtered,
                    spikes = report.spikes_detected,
                    blasts = report.blasts_detected,
                    keys_written = report.keys_written,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "reconciliation pass complete"
                );
                Some(report)
            }
            Err(e) => {
                self.metrics
                    .reconciliations_total
                    .with_label_values(&["error"])
                    .inc();
                self.protector.record_outcome(false);
                self.finish_status(|s| {
                    s.error_count += 1;
                    s.last_error = Some(e.to_string());
                });
                error!(error = %e, kind = e.kind(), "reconciliation pass failed");
                self.audit
                    .log(
                        AuditEntry::new("reconciler", actions::RECONCILE_FAILED)
                            .reason(e.to_string())
                            .failed(e.kind()),
                    )
                    .await;
                None
            }
        }
    }

    async fn tick(&self) -> WardenResult<TickReport> {
        let mut report = TickReport::default();

        // 1. Collect. A failure here aborts the pass.
        let collected = match self.collector.collect_metrics().await {
            Ok(metrics) => metrics,
            Err(e) => {
                self.metrics.record_component_error("collector");
                return Err(e);
            }
        };
        report.tenants_collected = collected.len();
        if collected.is_empty() {
            debug!("no tenants observed, nothing to reconcile");
            self.update_observability(&BTreeMap::new()).await;
            return Ok(report);
        }

        // 2. Tenant filter.
        let mut filtered: BTreeMap<String, TenantMetrics> = BTreeMap::new();
        for (tenant, tm) in collected {
            if self.selector.should_process(&tenant) {
                filtered.insert(tenant, tm);
            } else {
                report.tenants_filtered += 1;
            }
        }

        // 3. Blast protection preprocessing: rate limiting + detection.
        let (processed, blasts) = self
            .protector
            .process_metrics(filtered, self.clock.now_ms());
        report.blasts_detected = blasts.len();
        for blast in &blasts {
            self.metrics.record_component_error("blast-protector");
            self.audit
                .log(
                    AuditEntry::new("blast-protector", actions::BLAST_DETECTED)
                        .tenant(&blast.tenant)
                        .reason(format!(
                            "{} rate {:.1} exceeded threshold {:.1}",
                            blast.resource, blast.rate, blast.threshold
                        )),
                )
                .await;
        }
        report.tenants_processed = processed.len();

        // 4. Cost picture.
        let costs = if self.cost.enabled() {
            self.cost.calculate_costs(&processed)
        } else {
            BTreeMap::new()
        };

        // 5. Spike detection, audited per detection.
        let detections = self.analyzer.detect_spikes(&processed);
        for (tenant, metrics) in &detections {
            report.spikes_detected += metrics.len();
            for metric in metrics {
                let info = self.analyzer.spike_info(tenant, metric);
                let mut entry = AuditEntry::new("analyzer", actions::SPIKE_DETECTED)
                    .tenant(tenant)
                    .reason(format!("spike on {metric}"));
                if let Some(info) = info {
                    entry = entry.change(
                        format!("{metric}.multiplier"),
                        None,
                        serde_json::json!(info.multiplier),
                    );
                }
                self.audit.log(entry).await;
            }
        }

        // 6–7. Trend analysis and limit synthesis.
        let analysis = self.analyzer.analyze_trends(&processed);
        let mut limits = self.analyzer.calculate_limits(&analysis);

        // 8. Budget enforcement; alerts go out through the dispatcher.
        if self.cost.enabled() {
            let alerts = self.cost.enforce_budgets(&mut limits, &costs);
            for alert in &alerts {
                self.audit
                    .log(
                        AuditEntry::new("cost-controller", actions::BUDGET_VIOLATION)
                            .tenant(&alert.tenant)
                            .reason(alert.message.clone()),
                    )
                    .await;
            }
            self.alerts.dispatch(&alerts).await;
        }

        // 9. Circuit protection scales the final values.
        self.protector.apply_protection(&mut limits);

        // 10–11. Patch. Dry-run previews first, then writes the same way so
        // operators can inspect the output; prod just writes. Non-leaders
        // skip the write entirely.
        if self.leadership.load(Ordering::SeqCst) {
            if self.config.mode == Mode::DryRun {
                match self.patcher.preview_limits(&limits).await {
                    Ok(preview) => {
                        debug!(
                            changes = preview.changes.len(),
                            "dry-run preview computed"
                        );
                        self.audit
                            .log(
                                AuditEntry::new("patcher", actions::LIMITS_PREVIEWED).reason(
                                    format!("{} key(s) would change", preview.changes.len()),
                                ),
                            )
                            .await;
                    }
                    Err(e) => {
                        self.metrics.record_component_error("patcher");
                        warn!(error = %e, "dry-run preview failed");
                    }
                }
            }

            let outcome = match self.patcher.apply_limits(&limits).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.metrics.record_component_error("patcher");
                    return Err(e);
                }
            };
            report.keys_written = outcome.changes.len();
            report.wrote = outcome.wrote;
            if outcome.wrote {
                let mut entry = AuditEntry::new("patcher", actions::LIMITS_APPLIED)
                    .reason(format!(
                        "{} tenant(s), {} key(s)",
                        outcome.tenants_touched,
                        outcome.changes.len()
                    ))
                    .source(self.config.mode.to_string());
                for change in outcome.changes.iter().take(50) {
                    entry = entry.change(
                        format!("{}.{}", change.tenant, change.key),
                        change
                            .old
                            .as_ref()
                            .and_then(|v| serde_json::to_value(v).ok()),
                        serde_json::to_value(&change.new).unwrap_or_default(),
                    );
                }
                self.audit.log(entry).await;
            }
        } else {
            debug!("not leader, skipping document write");
        }

        // 12–13. Gauges, housekeeping, inline retention.
        self.metrics.update_limits(&limits);
        self.update_observability(&limits).await;

        let evicted = self.analyzer.evict_inactive();
        if !evicted.is_empty() {
            info!(tenants = evicted.len(), "evicted inactive tenants");
        }
        let retention = self.audit.run_retention().await;
        if retention.emergency {
            warn!(
                removed = retention.removed_total(),
                "audit retention ran in emergency mode"
            );
        }

        Ok(report)
    }

    async fn update_observability(
        &self,
        limits: &BTreeMap<String, warden_types::TenantLimits>,
    ) {
        self.metrics.tenants_processed.set(limits.len() as i64);
        self.metrics
            .set_circuit_state(self.protector.circuit_snapshot().state);
        self.metrics
            .active_spikes
            .set(self.analyzer.active_spike_count() as i64);
        self.metrics
            .audit_entries
            .set(self.audit.entry_count().await as i64);
    }

    fn finish_status(&self, update: impl FnOnce(&mut StatusSnapshot)) {
        let mut status = self.status.write().expect("status lock");
        status.reconcile_count += 1;
        status.last_reconcile = Some(chrono::Utc::now());
        status.is_leader = self.leadership.load(Ordering::SeqCst);
        update(&mut status);
        self.metrics
            .tenants_filtered
            .set(status.tenants_filtered as i64);
    }
}

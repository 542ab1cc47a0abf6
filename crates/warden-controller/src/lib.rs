//! Controller wiring: builds every component from configuration and drives
//! the reconciliation loop, background jobs, and the HTTP API.

pub mod alerts;
pub mod gauges;
pub mod leader;
pub mod reconciler;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;
use warden_analyzer::Analyzer;
use warden_api::{AppState, SharedStatus, StatusSnapshot};
use warden_audit::{AuditLogger, DocumentAuditLogger, MemoryAuditLogger, NoopAuditLogger};
use warden_collector::{Collector, ServiceDiscovery};
use warden_config::{AuditBackend, WardenConfig};
use warden_cost::CostController;
use warden_patcher::{NoopRestarter, Patcher, WorkloadRestarter};
use warden_protection::BlastProtector;
use warden_store::DocumentStore;
use warden_types::WardenResult;
use warden_utils::{Clock, MatchMode, PatternList, TenantSelector};

use crate::alerts::{AlertDispatcher, LogAlertSink};
use crate::gauges::ControllerMetrics;
use crate::reconciler::Reconciler;

/// A fully wired controller instance.
pub struct Controller {
    pub reconciler: Arc<Reconciler>,
    pub app_state: AppState,
    pub trigger_rx: Option<mpsc::Receiver<()>>,
    pub leadership: Arc<AtomicBool>,
}

impl Controller {
    /// Wire every component. The document store and service discovery are
    /// interface contracts: tests and local runs inject in-memory
    /// implementations, deployments inject orchestrator-backed ones.
    pub fn build(
        config: WardenConfig,
        store: Arc<dyn DocumentStore>,
        discovery: Arc<dyn ServiceDiscovery>,
        clock: Arc<dyn Clock>,
    ) -> WardenResult<Self> {
        let mode = if config.tenant_filter.use_regex {
            MatchMode::Regex
        } else {
            MatchMode::Glob
        };
        let selector = TenantSelector::new(
            PatternList::new(&config.tenant_filter.skip, mode)?,
            PatternList::new(&config.tenant_filter.include, mode)?,
        );

        let collector = Arc::new(Collector::new(
            config.collector.clone(),
            config.target.clone(),
            discovery,
            store.clone(),
        )?);
        let analyzer = Arc::new(Analyzer::new(
            config.analyzer.clone(),
            config.limits.definitions.clone(),
            clock.clone(),
        ));
        let cost = Arc::new(CostController::new(config.cost.clone(), clock.clone()));
        let protector = Arc::new(BlastProtector::new(
            config.protection.clone(),
            config.protection_enabled(),
            clock.clone(),
        ));

        let audit: Arc<dyn AuditLogger> = match config.audit.backend {
            AuditBackend::None => Arc::new(NoopAuditLogger),
            AuditBackend::Memory => Arc::new(MemoryAuditLogger::new(config.audit.clone())),
            AuditBackend::Document => Arc::new(DocumentAuditLogger::new(
                store.clone(),
                config.target.namespace.clone(),
                config.audit.clone(),
            )),
        };

        let restarter: Arc<dyn WorkloadRestarter> = Arc::new(NoopRestarter);
        let patcher = Arc::new(Patcher::new(
            store,
            config.target.clone(),
            selector.clone(),
            &config.limits.definitions,
            config.rollout.clone(),
            restarter,
        ));

        let alerts = Arc::new(
            AlertDispatcher::new().with_channel("log", Arc::new(LogAlertSink), clock.clone()),
        );
        let metrics = ControllerMetrics::new()?;
        let status: SharedStatus = Arc::new(std::sync::RwLock::new(StatusSnapshot::new(
            config.mode.to_string(),
        )));

        // Without leader election every instance "leads"; with it, the
        // elector task flips this flag.
        let leadership = Arc::new(AtomicBool::new(!config.leader_election.enabled));

        let (trigger_tx, trigger_rx) = mpsc::channel(4);
        let app_state = AppState {
            status: status.clone(),
            analyzer: analyzer.clone(),
            cost: cost.clone(),
            protector: protector.clone(),
            audit: audit.clone(),
            patcher: patcher.clone(),
            collector: collector.clone(),
            registry: metrics.registry.clone(),
            reconcile_tx: trigger_tx,
        };

        let reconciler = Arc::new(Reconciler {
            config,
            collector,
            selector,
            analyzer,
            cost,
            protector,
            patcher,
            audit,
            alerts,
            metrics,
            status,
            clock,
            leadership: leadership.clone(),
        });

        Ok(Self {
            reconciler,
            app_state,
            trigger_rx: Some(trigger_rx),
            leadership,
        })
    }
}

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::json;
use warden_protection::CircuitState;
use warden_types::AuditQuery;

use crate::errors::ApiError;
use crate::state::AppState;

/// Liveness probe.
pub async fn healthz() -> &'static str {
    "ok"
}

/// Readiness: at least one successful reconciliation, or a fresh process
/// still inside its startup grace period.
pub async fn readyz(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    let status = state.status.read().expect("status lock").clone();
    let grace = chrono::Duration::seconds(120);
    if status.last_success.is_some() || chrono::Utc::now() - status.started_at < grace {
        Ok("ready")
    } else {
        Err(ApiError::NotReady(
            status
                .last_error
                .unwrap_or_else(|| "no successful reconciliation yet".to_string()),
        ))
    }
}

/// Controller self-metrics in the text exposition format.
pub async fn metrics(State(state): State<AppState>) -> Result<String, ApiError> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&state.registry.gather(), &mut buffer)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| ApiError::Internal(e.to_string()))
}

/// System status: mode, tick counters, circuit state.
pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.status.read().expect("status lock").clone();
    let circuit = state.protector.circuit_snapshot();
    Json(json!({
        "status": status,
        "circuit": circuit,
        "active_spikes": state.analyzer.active_spike_count(),
        "source_errors": state.collector.source_error_count(),
    }))
}

#[derive(Serialize)]
pub struct TenantSummary {
    pub tenant: String,
    pub tracked_metrics: usize,
    pub active_spikes: usize,
    pub daily_cost: Option<f64>,
    pub budget_utilization_pct: Option<f64>,
}

/// Tenant list with per-tenant snapshots.
pub async fn tenants(State(state): State<AppState>) -> Json<Vec<TenantSummary>> {
    let costs = state.cost.cost_snapshot();
    let summaries = state
        .analyzer
        .tenant_snapshots()
        .into_iter()
        .map(|snapshot| {
            let cost = costs.get(&snapshot.tenant);
            TenantSummary {
                tracked_metrics: snapshot.tracked_metrics,
                active_spikes: snapshot.active_spikes.len(),
                daily_cost: cost.map(|c| c.daily_cost),
                budget_utilization_pct: cost.map(|c| c.utilization_pct),
                tenant: snapshot.tenant,
            }
        })
        .collect();
    Json(summaries)
}

/// One tenant in full: analysis state, cost, and currently stored limits.
pub async fn tenant_detail(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = state
        .analyzer
        .tenant_snapshots()
        .into_iter()
        .find(|s| s.tenant == tenant);
    let stored = state.patcher.get_current_limits().await?;
    let stored_limits = stored.get(&tenant);
    if snapshot.is_none() && stored_limits.is_none() {
        return Err(ApiError::NotFound(format!("tenant {tenant}")));
    }

    let costs = state.cost.cost_snapshot();
    Ok(Json(json!({
        "tenant": tenant,
        "analysis": snapshot,
        "cost": costs.get(&tenant),
        "stored_limits": stored_limits,
    })))
}

/// Audit entries with filter query parameters.
pub async fn audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Json<Vec<warden_types::AuditEntry>> {
    Json(state.audit.query(&query).await)
}

/// Static component descriptors plus live load figures.
pub async fn architecture(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.status.read().expect("status lock").clone();
    let circuit = state.protector.circuit_snapshot();
    Json(json!({
        "components": [
            { "name": "collector", "role": "scrapes tenant-labelled metrics from discovered endpoints" },
            { "name": "analyzer", "role": "windowed statistics, spike detection, limit synthesis" },
            { "name": "cost-controller", "role": "cost projection and budget enforcement" },
            { "name": "blast-protector", "role": "rate limiting, circuit breaking, blast detection" },
            { "name": "patcher", "role": "non-destructive merge into the runtime-overrides document" },
            { "name": "audit-log", "role": "bounded, retention-governed action trail" },
        ],
        "flow": "collector -> filter -> protector -> cost -> analyzer -> patcher -> audit",
        "live": {
            "tenants_processed": status.tenants_processed,
            "tenants_filtered": status.tenants_filtered,
            "circuit_state": circuit.state,
            "sources": state.collector.source_reports().len(),
            "rate_limited_tenants": state.protector.bucket_stats().iter().filter(|b| b.rejected > 0).count(),
        }
    }))
}

/// Latest infrastructure scan: one report per scraped source.
pub async fn scan(State(state): State<AppState>) -> Json<Vec<warden_collector::SourceReport>> {
    Json(state.collector.source_reports())
}

/// Derived health metrics and operator recommendations.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.status.read().expect("status lock").clone();
    let circuit = state.protector.circuit_snapshot();
    let reports = state.collector.source_reports();
    let unhealthy_sources: Vec<&str> = reports
        .iter()
        .filter(|r| !r.healthy)
        .map(|r| r.source.as_str())
        .collect();

    let mut recommendations: Vec<String> = Vec::new();
    if circuit.state != CircuitState::Closed {
        recommendations.push(
            "circuit breaker is limiting writes; investigate recent pipeline failures".to_string(),
        );
    }
    if circuit.emergency_mode || circuit.panic_mode {
        recommendations
            .push("sticky protection mode active; review the trigger before recovery".to_string());
    }
    if !unhealthy_sources.is_empty() {
        recommendations.push(format!(
            "metrics sources failing: {}",
            unhealthy_sources.join(", ")
        ));
    }
    if status.error_count > 0 && status.last_success.is_none() {
        recommendations.push("no successful reconciliation yet; check collector connectivity".to_string());
    }
    let spikes = state.analyzer.active_spike_count();
    if spikes > 0 {
        recommendations.push(format!("{spikes} active traffic spike(s); limits are boosted"));
    }

    Json(json!({
        "healthy": status.last_success.is_some() && circuit.state == CircuitState::Closed,
        "error_count": status.error_count,
        "reconcile_count": status.reconcile_count,
        "audit_entries": state.audit.entry_count().await,
        "unhealthy_sources": unhealthy_sources,
        "active_spikes": spikes,
        "recommendations": recommendations,
    }))
}

/// Operational: run a reconciliation pass outside the schedule.
pub async fn trigger_reconcile(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state
        .reconcile_tx
        .try_send(())
        .map_err(|_| ApiError::Internal("reconciler busy or shutting down".to_string()))?;
    Ok(StatusCode::ACCEPTED)
}

/// Operational: restore the pre-apply snapshot of the overrides document.
pub async fn rollback(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.patcher.rollback_changes().await?;
    Ok(StatusCode::OK)
}

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use warden_collector::StaticDiscovery;
use warden_config::Mode;
use warden_controller::leader::LeaderElector;
use warden_controller::Controller;
use warden_store::MemoryDocumentStore;
use warden_utils::RealClock;

#[derive(Parser)]
#[command(name = "warden-controller")]
#[command(about = "Per-tenant resource-limit controller for multi-tenant time-series databases")]
struct Args {
    #[arg(long, default_value = "config/warden.yaml")]
    config: String,

    /// Override the API bind address from the config file.
    #[arg(long)]
    bind: Option<String>,

    /// Override the operating mode (dry-run or prod).
    #[arg(long)]
    mode: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hyper=warn,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = warden_config::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config))?;
    if let Some(bind) = args.bind {
        config.api.bind = bind;
    }
    match args.mode.as_deref() {
        Some("dry-run") => config.mode = Mode::DryRun,
        Some("prod") => config.mode = Mode::Prod,
        Some(other) => anyhow::bail!("unknown mode {other:?}, expected dry-run or prod"),
        None => {}
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = %config.mode,
        bind = %config.api.bind,
        "starting warden controller"
    );

    // The orchestrator-backed document store and service discovery are
    // injected in deployments; the standalone binary runs against the
    // in-memory store, which is what dry-run inspection needs.
    let store = Arc::new(MemoryDocumentStore::new());
    let discovery = Arc::new(StaticDiscovery::new(config.collector.discovery.clone()));
    let clock = Arc::new(RealClock);

    let api_config = config.api.clone();
    let audit_cleanup_secs = config.audit.cleanup_interval_secs;
    let adaptation = config.protection.blast.adaptation.clone();
    let leader_config = config.leader_election.clone();
    let namespace = config.target.namespace.clone();

    let mut controller = Controller::build(config, store.clone(), discovery, clock.clone())?;
    let trigger_rx = controller.trigger_rx.take().expect("fresh controller");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Reconciliation loop.
    let reconciler = controller.reconciler.clone();
    let loop_shutdown = shutdown_rx.clone();
    let reconcile_task = tokio::spawn(async move {
        reconciler.run(trigger_rx, loop_shutdown).await;
    });

    // Background audit retention.
    let audit = controller.reconciler.audit.clone();
    let mut retention_shutdown = shutdown_rx.clone();
    let retention_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(audit_cleanup_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let outcome = audit.run_retention().await;
                    if !outcome.is_noop() {
                        info!(removed = outcome.removed_total(), emergency = outcome.emergency, "audit retention pass");
                    }
                }
                _ = retention_shutdown.changed() => {
                    if *retention_shutdown.borrow() { break; }
                }
            }
        }
    });

    // Adaptive-threshold loop inside the blast protector.
    let protector = controller.reconciler.protector.clone();
    let adaptation_clock = clock.clone();
    let mut adaptation_shutdown = shutdown_rx.clone();
    let adaptation_task = tokio::spawn(async move {
        if !adaptation.enabled {
            return;
        }
        let mut interval = tokio::time::interval(Duration::from_secs(adaptation.interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    use warden_utils::Clock;
                    let adjusted = protector.adaptation_pass(adaptation_clock.now_ms());
                    if adjusted > 0 {
                        info!(thresholds = adjusted, "adaptive thresholds updated");
                    }
                }
                _ = adaptation_shutdown.changed() => {
                    if *adaptation_shutdown.borrow() { break; }
                }
            }
        }
    });

    // Optional leader-election lease renewal.
    let leader_task = if leader_config.enabled {
        let elector = LeaderElector::new(store, namespace, leader_config.clone());
        let flag = controller.leadership.clone();
        let elector_flag = elector.leadership_flag();
        let mut leader_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(leader_config.renew_interval_secs));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        elector.try_acquire_or_renew().await;
                        flag.store(
                            elector_flag.load(std::sync::atomic::Ordering::SeqCst),
                            std::sync::atomic::Ordering::SeqCst,
                        );
                    }
                    _ = leader_shutdown.changed() => {
                        if *leader_shutdown.borrow() { break; }
                    }
                }
            }
        }))
    } else {
        None
    };

    // HTTP API.
    let router = warden_api::router(controller.app_state.clone(), &api_config);
    let listener = tokio::net::TcpListener::bind(&api_config.bind)
        .await
        .with_context(|| format!("binding API listener on {}", api_config.bind))?;
    info!(bind = %api_config.bind, "API listening");
    let mut server_shutdown = shutdown_rx.clone();
    let server_task = tokio::spawn(async move {
        let shutdown = async move {
            loop {
                if server_shutdown.changed().await.is_err() || *server_shutdown.borrow() {
                    break;
                }
            }
        };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!(error = %e, "API server exited with error");
        }
    });

    // Wait for a termination signal, then drain.
    shutdown_signal().await;
    info!("shutdown signal received, draining");
    let _ = shutdown_tx.send(true);

    let _ = reconcile_task.await;
    let _ = retention_task.await;
    let _ = adaptation_task.await;
    if let Some(task) = leader_task {
        let _ = task.await;
    }
    let _ = server_task.await;

    controller.reconciler.audit.close().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

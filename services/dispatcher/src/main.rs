//! Prow job dispatcher.
//!
//! Serves cluster assignments for Prow jobs over HTTP and keeps them current
//! with a periodic reconciliation pass over the job inventory.

use anyhow::Result;
use cidispatch_dispatcher::{EphemeralScheduler, JobRecords};
use cidispatch_server::{
    api, config,
    state::AppState,
    worker::{self, ReconcileWorker},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to DISPATCHER_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting prow job dispatcher");
    info!(
        listen_addr = %config.listen_addr,
        config_path = %config.sources.config_path.display(),
        cluster_config_path = %config.sources.cluster_config_path.display(),
        jobs_path = %config.sources.jobs_path.display(),
        "Configuration loaded"
    );

    let state = AppState::new(JobRecords::new(), EphemeralScheduler::new(Vec::new()));

    // Refuse to serve until the sources load and validate once.
    let initial = tokio::task::spawn_blocking({
        let state = state.clone();
        let sources = config.sources.clone();
        move || worker::reconcile_once(&state, &sources)
    })
    .await?;
    let initial = match initial {
        Ok(result) => result,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Initial reconciliation failed");
            return Err(e);
        }
    };
    info!(
        jobs_assigned = initial.stats.jobs_assigned,
        jobs_failed = initial.stats.jobs_failed,
        "Initial reconciliation complete"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconcile_worker = ReconcileWorker::new(
        state.clone(),
        config.sources.clone(),
        config.reconcile_interval,
        Some(initial.clusters),
    );
    let worker_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            reconcile_worker.run(shutdown_rx).await;
        }
    });

    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    let shutdown_timeout = std::time::Duration::from_secs(10);
    if let Err(e) = tokio::time::timeout(shutdown_timeout, worker_handle).await {
        warn!(error = %e, "Reconcile worker did not shut down in time");
    }

    info!("Dispatcher shutdown complete");
    Ok(())
}

use std::path::Path;
use std::sync::Arc;

use lockstep::constants::APPLOGS_TREE;
use lockstep::constants::EVENTS_TREE;
use lockstep::constants::LOCKS_TREE;
use lockstep::init_sled_db;
use lockstep::metrics;
use lockstep::Error;
use lockstep::EventFilter;
use lockstep::EventManager;
use lockstep::EventStore;
use lockstep::InternalOnly;
use lockstep::LockManager;
use lockstep::LockSweeper;
use lockstep::LogHub;
use lockstep::PlaneConfig;
use lockstep::Result;
use lockstep::SledStore;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let settings = PlaneConfig::new()?.validate()?;

    // Initializing Logs
    let _guard = init_observability(&settings.log_dir);

    // Initializing Shutdown Signal
    let (graceful_tx, mut graceful_rx) = watch::channel(());
    let cancel = CancellationToken::new();

    // Open stores
    let db = init_sled_db(&settings.storage.db_path)
        .map_err(|e| Error::Fatal(format!("open database {:?}: {}", settings.storage.db_path, e)))?;
    let flush = settings.storage.flush_on_write;
    let locks_store = Arc::new(SledStore::open(&db, LOCKS_TREE, flush)?);
    let events_store = Arc::new(SledStore::open(&db, EVENTS_TREE, flush)?);
    let applogs_store = Arc::new(SledStore::open(&db, APPLOGS_TREE, flush)?);

    let locks = Arc::new(LockManager::new(locks_store, settings.lock.stale_after()));
    let events = EventManager::new(locks.clone(), Arc::new(EventStore::new(events_store)));
    let hub = LogHub::new(applogs_store, Arc::new(InternalOnly), settings.log_hub.clone());

    let sweeper = LockSweeper::new(locks.clone(), settings.lock.sweep_interval()).spawn(cancel.clone());

    metrics::register_custom_metrics();
    let metrics_server = if settings.monitoring.prometheus_enabled {
        Some(tokio::spawn(metrics::start_server(
            settings.monitoring.prometheus_port,
            graceful_rx.clone(),
        )))
    } else {
        None
    };

    report_in_flight(&events)?;
    info!("control plane started. Waiting for CTRL+C signal...");
    // Listen on Shutdown Signal
    tokio::spawn(async {
        if let Err(e) = graceful_shutdown(graceful_tx).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    if let Err(e) = wait_for_shutdown(&mut graceful_rx).await {
        error!("{}, shutting down", e);
    }

    cancel.cancel();
    hub.shutdown();
    if let Some(handle) = sweeper {
        if let Err(e) = handle.await {
            error!("stale lock sweep task failed: {:?}", e);
        }
    }
    if let Some(handle) = metrics_server {
        if let Err(e) = handle.await {
            error!("metrics server task failed: {:?}", e);
        }
    }
    db.flush_async().await?;

    info!("Exiting program.");
    Ok(())
}

/// Logs operations a previous process left running; their locks stay held
/// until the stale lock sweep or a conflicting acquisition reclaims them.
fn report_in_flight(events: &EventManager) -> Result<()> {
    let filter = EventFilter {
        running: Some(true),
        ..Default::default()
    };
    for record in events.store().query(&filter)? {
        warn!(
            event_id = %record.id,
            kind = %record.kind,
            owner = %record.owner,
            started = %record.start_time,
            "event left running by a previous process"
        );
    }
    info!(held_locks = events.locks().locked_targets()?.len(), "lock table loaded");
    Ok(())
}

/// Resolves once a shutdown signal is sent. Fails if the signal task went
/// away without sending, e.g. because installing the handlers failed.
async fn wait_for_shutdown(graceful_rx: &mut watch::Receiver<()>) -> Result<()> {
    graceful_rx
        .changed()
        .await
        .map_err(|_| Error::Fatal("shutdown signal sender dropped before any signal".to_string()))
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| Error::Fatal(format!("install SIGINT handler: {}", e)))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| Error::Fatal(format!("install SIGTERM handler: {}", e)))?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }

    info!("Shutdown server..");
    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        Error::Fatal(format!("Failed to send shutdown signal: {}", e))
    })?;
    Ok(())
}

fn init_observability(log_dir: &Path) -> WorkerGuard {
    let log_file = tracing_appender::rolling::never(log_dir, "lockstep.log");

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_for_shutdown_returns_on_signal() {
        let (tx, mut rx) = watch::channel(());
        tx.send(()).unwrap();
        assert!(wait_for_shutdown(&mut rx).await.is_ok());
    }

    #[tokio::test]
    async fn wait_for_shutdown_reports_dropped_sender() {
        let (tx, mut rx) = watch::channel(());
        drop(tx);
        let err = wait_for_shutdown(&mut rx).await.unwrap_err();
        assert!(err.to_string().contains("sender dropped"));
    }
}

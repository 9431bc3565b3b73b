use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

lazy_static! {
    pub static ref LOGS_APP_TAIL: IntGaugeVec = IntGaugeVec::new(
        Opts::new(
            "lockstep_logs_app_tail_current",
            "The current number of active log tail queries for an app."
        ),
        &["app"]
    )
    .expect("metric can not be created");

    pub static ref LOGS_APP_TAIL_ENTRIES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "lockstep_logs_app_tail_entries_total",
            "The number of log entries read in tail requests for an app."
        ),
        &["app"]
    )
    .expect("metric can not be created");

    pub static ref LOGS_APP_DROPPED: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "lockstep_logs_app_dropped_total",
            "The number of log entries dropped because a tail queue was full."
        ),
        &["app"]
    )
    .expect("metric can not be created");

    pub static ref LOCK_CONFLICTS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "lockstep_lock_conflicts_total",
            "The number of lock acquisitions rejected because the target was held."
        ),
        &["target_kind"]
    )
    .expect("metric can not be created");

    pub static ref STALE_LOCKS_RECLAIMED: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "lockstep_stale_locks_reclaimed_total",
            "The number of abandoned locks force-released after the staleness threshold."
        ),
        &["target_kind"]
    )
    .expect("metric can not be created");

    pub static ref EVENTS_FINISHED: IntCounterVec = IntCounterVec::new(
        Opts::new("lockstep_events_finished_total", "The number of finalized events."),
        &["kind", "status"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

pub fn register_custom_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(LOGS_APP_TAIL.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(LOGS_APP_TAIL_ENTRIES.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(LOGS_APP_DROPPED.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(LOCK_CONFLICTS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(STALE_LOCKS_RECLAIMED.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(EVENTS_FINISHED.clone()))
            .expect("collector can be registered");
    });
}

pub async fn start_server(
    port: u16,
    mut shutdown_signal: watch::Receiver<()>,
) {
    register_custom_metrics();

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    info!("metrics server listening on 0.0.0.0:{}", port);
    let (_, server) =
        warp::serve(metrics_route).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
            let _ = shutdown_signal.changed().await;
        });
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(gather_text())
}

/// Text exposition of every registered collector.
pub fn gather_text() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    };
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}

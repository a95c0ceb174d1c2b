use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Counter, CounterVec, Encoder, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const NAMESPACE: &str = "pixelstatsd";

/// Prometheus metrics describing the daemon's own health.
///
/// The counters always exist so every component can record into them;
/// serving them over HTTP is optional.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    // === Uevent path ===
    /// Datagrams received from the uevent socket.
    pub uevents_received: Counter,
    /// Failed listener iterations by reason.
    pub uevent_errors: CounterVec,
    /// Handler failures (errors and panics) by handler.
    pub uevent_handler_failures: CounterVec,

    // === Polling path ===
    /// Base ticks consumed by the scheduler.
    pub scheduler_ticks: Counter,
    /// Cadence firings by cadence.
    pub cadence_fires: CounterVec,
    /// Firings where the cadence had slept through more than one period.
    pub cadence_overshoots: CounterVec,
    /// Collector runs by collector and outcome (reported/skipped/failed).
    pub collector_runs: CounterVec,
    /// Counter resets observed by delta-tracking collectors.
    pub delta_resets: CounterVec,

    // === Reporting ===
    /// Atoms handed to the sinks by atom name.
    pub atoms_reported: CounterVec,
    /// Rejected reports by sink.
    pub sink_failures: CounterVec,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let uevents_received = Counter::with_opts(
            Opts::new(
                "uevents_received_total",
                "Total datagrams received from the uevent socket.",
            )
            .namespace(NAMESPACE),
        )?;
        let uevent_errors = CounterVec::new(
            Opts::new(
                "uevent_errors_total",
                "Failed uevent listener iterations by reason.",
            )
            .namespace(NAMESPACE),
            &["reason"],
        )?;
        let uevent_handler_failures = CounterVec::new(
            Opts::new(
                "uevent_handler_failures_total",
                "Uevent handler failures by handler.",
            )
            .namespace(NAMESPACE),
            &["handler"],
        )?;
        let scheduler_ticks = Counter::with_opts(
            Opts::new(
                "scheduler_ticks_total",
                "Total base ticks consumed by the cadence scheduler.",
            )
            .namespace(NAMESPACE),
        )?;
        let cadence_fires = CounterVec::new(
            Opts::new("cadence_fires_total", "Cadence firings by cadence.").namespace(NAMESPACE),
            &["cadence"],
        )?;
        let cadence_overshoots = CounterVec::new(
            Opts::new(
                "cadence_overshoot_total",
                "Cadence firings that were late by more than one full period.",
            )
            .namespace(NAMESPACE),
            &["cadence"],
        )?;
        let collector_runs = CounterVec::new(
            Opts::new(
                "collector_runs_total",
                "Collector runs by collector and outcome.",
            )
            .namespace(NAMESPACE),
            &["collector", "outcome"],
        )?;
        let delta_resets = CounterVec::new(
            Opts::new(
                "delta_resets_total",
                "Cumulative counter resets observed by collector.",
            )
            .namespace(NAMESPACE),
            &["collector"],
        )?;
        let atoms_reported = CounterVec::new(
            Opts::new("atoms_reported_total", "Atoms handed to sinks by atom.")
                .namespace(NAMESPACE),
            &["atom"],
        )?;
        let sink_failures = CounterVec::new(
            Opts::new("sink_failures_total", "Rejected atom reports by sink.")
                .namespace(NAMESPACE),
            &["sink"],
        )?;

        registry.register(Box::new(uevents_received.clone()))?;
        registry.register(Box::new(uevent_errors.clone()))?;
        registry.register(Box::new(uevent_handler_failures.clone()))?;
        registry.register(Box::new(scheduler_ticks.clone()))?;
        registry.register(Box::new(cadence_fires.clone()))?;
        registry.register(Box::new(cadence_overshoots.clone()))?;
        registry.register(Box::new(collector_runs.clone()))?;
        registry.register(Box::new(delta_resets.clone()))?;
        registry.register(Box::new(atoms_reported.clone()))?;
        registry.register(Box::new(sink_failures.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            uevents_received,
            uevent_errors,
            uevent_handler_failures,
            scheduler_ticks,
            cadence_fires,
            cadence_overshoots,
            collector_runs,
            delta_resets,
            atoms_reported,
            sink_failures,
        })
    }

    /// Renders every registered metric in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .context("encoding metrics")?;

        String::from_utf8(buffer).context("converting metrics to string")
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    pub async fn start(self: Arc<Self>) -> Result<SocketAddr> {
        let addr = if self.addr.is_empty() {
            ":9090"
        } else {
            &self.addr
        };

        // ":port" listens on all interfaces.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(Arc::clone(&self));

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    cancel.cancelled().await;
                })
                .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(local_addr)
    }

    /// Gracefully shuts down the health metrics server.
    pub fn stop(&self) {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }
    }
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(metrics): State<Arc<HealthMetrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "rendering metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}

//! Exporter — serves metric snapshots over HTTP and pushes them to
//! configured sinks.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::prometheus::render_prometheus;
use crate::push::PushTarget;
use crate::store::MetricsStore;

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Exporter configuration.
#[derive(Debug, Clone)]
pub struct ExporterOptions {
    /// Graphite plaintext sink, `host:port`.
    pub graphite: Option<String>,
    /// statsd sink, `host:port`.
    pub statsd: Option<String>,
    pub push_interval: Duration,
    /// Prepended to every pushed metric path.
    pub prefix: String,
}

impl Default for ExporterOptions {
    fn default() -> Self {
        Self {
            graphite: None,
            statsd: None,
            push_interval: Duration::from_secs(60),
            prefix: String::new(),
        }
    }
}

#[derive(Clone)]
pub struct Exporter {
    store: MetricsStore,
    targets: Arc<Vec<PushTarget>>,
    push_interval: Duration,
    prefix: Arc<str>,
}

impl Exporter {
    pub fn new(store: MetricsStore, options: ExporterOptions) -> Self {
        let mut targets = Vec::new();
        if let Some(addr) = options.graphite {
            targets.push(PushTarget::Graphite(addr));
        }
        if let Some(addr) = options.statsd {
            targets.push(PushTarget::Statsd(addr));
        }

        Self {
            store,
            targets: Arc::new(targets),
            push_interval: options.push_interval,
            prefix: options.prefix.into(),
        }
    }

    pub fn targets(&self) -> &[PushTarget] {
        &self.targets
    }

    /// Routes for `/json` and `/metrics`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/json", get(handle_json))
            .route("/metrics", get(handle_prometheus))
            .with_state(self.clone())
    }

    /// Push one snapshot to every sink. Failures are logged, not returned;
    /// the return value is the number of sinks that accepted the push.
    pub async fn write_metrics(&self) -> usize {
        if self.targets.is_empty() {
            return 0;
        }

        let metrics = self.store.snapshot().await;
        let now = epoch_secs();
        let mut delivered = 0;
        for target in self.targets.iter() {
            match target.push(&metrics, &self.prefix, now).await {
                Ok(()) => {
                    delivered += 1;
                    debug!(sink = target.kind(), addr = target.addr(), "metrics pushed");
                }
                Err(e) => {
                    warn!(sink = target.kind(), addr = target.addr(), error = %e, "metric push failed");
                }
            }
        }
        delivered
    }

    /// Spawn the periodic push loop. Returns `None` when no sink is configured.
    pub fn start_metric_push(&self, mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if self.targets.is_empty() {
            return None;
        }

        let exporter = self.clone();
        Some(tokio::spawn(async move {
            info!(
                interval_secs = exporter.push_interval.as_secs(),
                sinks = exporter.targets.len(),
                "metric push started"
            );
            let mut interval = tokio::time::interval(exporter.push_interval);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        exporter.write_metrics().await;
                    }
                    _ = shutdown.changed() => {
                        info!("metric push shutting down");
                        break;
                    }
                }
            }
        }))
    }
}

/// GET /json
async fn handle_json(State(exporter): State<Exporter>) -> impl IntoResponse {
    Json(exporter.store.snapshot().await)
}

/// GET /metrics
async fn handle_prometheus(State(exporter): State<Exporter>) -> impl IntoResponse {
    let metrics = exporter.store.snapshot().await;
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        render_prometheus(&metrics),
    )
}

fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

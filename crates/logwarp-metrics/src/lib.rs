//! logwarp-metrics — metric storage and export.
//!
//! Programs write named metrics into the [`MetricsStore`]; the
//! [`Exporter`] reads it to serve JSON and Prometheus snapshots and to push
//! to graphite/statsd sinks.
//!
//! # Architecture
//!
//! ```text
//! MetricsStore
//!   ├── add()      ← program load
//!   ├── record()   ← per matching line
//!   └── snapshot() → Exporter
//!
//! Exporter
//!   ├── router()            → GET /json, GET /metrics
//!   ├── write_metrics()     → one push to every sink
//!   └── start_metric_push() → periodic push loop
//! ```

pub mod exporter;
pub mod prometheus;
pub mod push;
pub mod store;

pub use exporter::{Exporter, ExporterOptions};
pub use prometheus::render_prometheus;
pub use push::PushTarget;
pub use store::{LabelValue, Metric, MetricKind, MetricsStore, StoreError, Update};

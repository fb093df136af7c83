//! Metric store — named metrics written by programs, read by exporters.
//!
//! Every metric is registered once (by the program that declares it) and
//! then updated per matching line. A metric with label keys holds one
//! [`LabelValue`] per distinct label tuple.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Errors raised by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("metric {name} already declared by program {program}")]
    Duplicate { name: String, program: String },

    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("metric {name} expects {expected} labels, got {got}")]
    LabelArity {
        name: String,
        expected: usize,
        got: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

/// One value of a metric, keyed by its label tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelValue {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    pub value: f64,
    /// Unix seconds of the last update.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub program: String,
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    pub label_values: Vec<LabelValue>,
}

impl Metric {
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        kind: MetricKind,
        keys: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            kind,
            keys,
            label_values: Vec::new(),
        }
    }

    fn entry(&mut self, labels: Vec<String>) -> &mut LabelValue {
        let idx = match self.label_values.iter().position(|lv| lv.labels == labels) {
            Some(idx) => idx,
            None => {
                self.label_values.push(LabelValue {
                    labels,
                    value: 0.0,
                    timestamp: 0,
                });
                self.label_values.len() - 1
            }
        };
        &mut self.label_values[idx]
    }
}

/// How a matching line changes a metric value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Update {
    Inc,
    Add(f64),
    Set(f64),
}

/// Shared metric storage: metric name → metric.
#[derive(Clone, Default)]
pub struct MetricsStore {
    metrics: Arc<RwLock<BTreeMap<String, Metric>>>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a metric. Names are unique across all programs.
    pub async fn add(&self, metric: Metric) -> Result<(), StoreError> {
        let mut metrics = self.metrics.write().await;
        if let Some(existing) = metrics.get(&metric.name) {
            return Err(StoreError::Duplicate {
                name: metric.name,
                program: existing.program.clone(),
            });
        }
        debug!(name = %metric.name, program = %metric.program, "metric registered");
        metrics.insert(metric.name.clone(), metric);
        Ok(())
    }

    /// Apply an update to the value identified by `labels`.
    pub async fn record(
        &self,
        name: &str,
        labels: Vec<String>,
        update: Update,
        timestamp: i64,
    ) -> Result<(), StoreError> {
        let mut metrics = self.metrics.write().await;
        let metric = metrics
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownMetric(name.to_string()))?;

        if labels.len() != metric.keys.len() {
            return Err(StoreError::LabelArity {
                name: name.to_string(),
                expected: metric.keys.len(),
                got: labels.len(),
            });
        }

        let lv = metric.entry(labels);
        match update {
            Update::Inc => lv.value += 1.0,
            Update::Add(delta) => lv.value += delta,
            Update::Set(value) => lv.value = value,
        }
        lv.timestamp = timestamp;
        Ok(())
    }

    /// Point-in-time copy of every metric.
    pub async fn snapshot(&self) -> BTreeMap<String, Metric> {
        self.metrics.read().await.clone()
    }

    pub async fn get(&self, name: &str) -> Option<Metric> {
        self.metrics.read().await.get(name).cloned()
    }

    /// Indented JSON object keyed by metric name.
    pub async fn to_json_pretty(&self) -> serde_json::Result<String> {
        let metrics = self.metrics.read().await;
        serde_json::to_string_pretty(&*metrics)
    }

    pub async fn len(&self) -> usize {
        self.metrics.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.metrics.read().await.is_empty()
    }
}

//! Push sinks — graphite (plaintext over TCP) and statsd (UDP).

use std::collections::BTreeMap;

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};

use crate::store::{Metric, MetricKind};

/// A configured push destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushTarget {
    Graphite(String),
    Statsd(String),
}

impl PushTarget {
    pub fn addr(&self) -> &str {
        match self {
            PushTarget::Graphite(addr) | PushTarget::Statsd(addr) => addr,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PushTarget::Graphite(_) => "graphite",
            PushTarget::Statsd(_) => "statsd",
        }
    }

    /// Send one snapshot to this target.
    pub async fn push(
        &self,
        metrics: &BTreeMap<String, Metric>,
        prefix: &str,
        now: i64,
    ) -> anyhow::Result<()> {
        match self {
            PushTarget::Graphite(addr) => {
                let payload = format_graphite(metrics, prefix, now);
                let mut stream = TcpStream::connect(addr)
                    .await
                    .with_context(|| format!("connect to graphite at {addr}"))?;
                stream.write_all(payload.as_bytes()).await?;
                stream.shutdown().await?;
            }
            PushTarget::Statsd(addr) => {
                let socket = UdpSocket::bind("0.0.0.0:0").await?;
                socket
                    .connect(addr)
                    .await
                    .with_context(|| format!("connect to statsd at {addr}"))?;
                for packet in format_statsd(metrics, prefix) {
                    socket.send(packet.as_bytes()).await?;
                }
            }
        }
        Ok(())
    }
}

/// One `path value timestamp` line per metric value.
pub fn format_graphite(metrics: &BTreeMap<String, Metric>, prefix: &str, now: i64) -> String {
    let mut out = String::new();
    for metric in metrics.values() {
        for lv in &metric.label_values {
            let ts = if lv.timestamp > 0 { lv.timestamp } else { now };
            out.push_str(&format!(
                "{} {} {ts}\n",
                metric_path(prefix, &metric.name, &lv.labels),
                lv.value
            ));
        }
    }
    out
}

/// One statsd packet per metric value.
pub fn format_statsd(metrics: &BTreeMap<String, Metric>, prefix: &str) -> Vec<String> {
    let mut packets = Vec::new();
    for metric in metrics.values() {
        let suffix = match metric.kind {
            MetricKind::Counter => "c",
            MetricKind::Gauge => "g",
        };
        for lv in &metric.label_values {
            packets.push(format!(
                "{}:{}|{suffix}",
                metric_path(prefix, &metric.name, &lv.labels),
                lv.value
            ));
        }
    }
    packets
}

fn metric_path(prefix: &str, name: &str, labels: &[String]) -> String {
    let mut path = format!("{prefix}{name}");
    for label in labels {
        path.push('.');
        path.extend(label.chars().map(|c| match c {
            '.' | ' ' | ':' | '|' => '_',
            c => c,
        }));
    }
    path
}

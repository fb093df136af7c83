//! Prometheus text exposition format.
//!
//! Renders the metric store into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent.

use std::collections::BTreeMap;

use crate::store::Metric;

/// Render all metrics into Prometheus text format.
///
/// Emits one TYPE declaration per metric followed by one sample per label
/// tuple. Metrics that have never been updated still get their TYPE line.
pub fn render_prometheus(metrics: &BTreeMap<String, Metric>) -> String {
    let mut out = String::new();

    for metric in metrics.values() {
        let name = sanitize_name(&metric.name);
        out.push_str(&format!(
            "# HELP {name} defined by {}\n",
            metric.program
        ));
        out.push_str(&format!("# TYPE {name} {}\n", metric.kind.as_str()));

        for lv in &metric.label_values {
            if metric.keys.is_empty() {
                out.push_str(&format!("{name} {}\n", lv.value));
                continue;
            }
            let labels: Vec<String> = metric
                .keys
                .iter()
                .zip(&lv.labels)
                .map(|(k, v)| format!("{}=\"{}\"", sanitize_name(k), escape_label(v)))
                .collect();
            out.push_str(&format!("{name}{{{}}} {}\n", labels.join(","), lv.value));
        }
    }

    out
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .enumerate()
        .map(|(i, c)| match c {
            'a'..='z' | 'A'..='Z' | '_' | ':' => c,
            '0'..='9' if i > 0 => c,
            _ => '_',
        })
        .collect()
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LabelValue, MetricKind};

    fn test_metric(name: &str, keys: &[&str], values: &[(&[&str], f64)]) -> Metric {
        Metric {
            name: name.to_string(),
            program: "web.prog".to_string(),
            kind: MetricKind::Counter,
            keys: keys.iter().map(|k| k.to_string()).collect(),
            label_values: values
                .iter()
                .map(|(labels, value)| LabelValue {
                    labels: labels.iter().map(|l| l.to_string()).collect(),
                    value: *value,
                    timestamp: 1000,
                })
                .collect(),
        }
    }

    fn render(metrics: Vec<Metric>) -> String {
        let map = metrics.into_iter().map(|m| (m.name.clone(), m)).collect();
        render_prometheus(&map)
    }

    #[test]
    fn render_empty() {
        assert!(render(vec![]).is_empty());
    }

    #[test]
    fn render_unlabelled_metric() {
        let output = render(vec![test_metric("lines_total", &[], &[(&[], 42.0)])]);

        assert!(output.contains("# TYPE lines_total counter\n"));
        assert!(output.contains("lines_total 42\n"));
    }

    #[test]
    fn render_labelled_metric() {
        let output = render(vec![test_metric(
            "requests_total",
            &["method", "code"],
            &[(&["GET", "200"], 3.0), (&["POST", "500"], 1.5)],
        )]);

        assert!(output.contains("requests_total{method=\"GET\",code=\"200\"} 3\n"));
        assert!(output.contains("requests_total{method=\"POST\",code=\"500\"} 1.5\n"));
    }

    #[test]
    fn declared_but_unset_metric_has_type_only() {
        let output = render(vec![test_metric("idle_total", &[], &[])]);
        assert_eq!(output.lines().filter(|l| !l.starts_with('#')).count(), 0);
        assert!(output.contains("# TYPE idle_total counter"));
    }

    #[test]
    fn names_and_labels_are_sanitized() {
        let output = render(vec![test_metric(
            "http.bytes-total",
            &["path"],
            &[(&["/a\"b"], 1.0)],
        )]);
        assert!(output.contains("http_bytes_total{path=\"/a\\\"b\"} 1\n"));
        assert_eq!(sanitize_name("9lives"), "_lives");
    }
}

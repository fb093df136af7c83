//! Line execution — runs a compiled program's instructions over one line.

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use logwarp_metrics::{MetricsStore, Update};
use regex::Captures;
use tracing::{debug, warn};

use crate::program::{Instr, Program};

/// Format specifiers that already carry a year.
const YEAR_SPECIFIERS: &[&str] = &["%Y", "%y", "%G", "%g", "%C", "%s", "%+", "%c", "%D", "%F", "%x"];
const ZONE_SPECIFIERS: &[&str] = &["%z", "%:z", "%::z", "%#z", "%Z", "%+"];

/// Outcome of running one line through a program.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LineOutcome {
    pub matched: usize,
    pub updates: usize,
    pub errors: usize,
}

impl Program {
    /// Run every rule of the program against `line`, updating `store`.
    pub async fn execute(
        &self,
        line: &str,
        store: &MetricsStore,
        syslog_use_current_year: bool,
    ) -> LineOutcome {
        let now = Utc::now();
        let mut outcome = LineOutcome::default();
        let mut caps: Option<Captures<'_>> = None;
        let mut timestamp = now.timestamp();
        let mut pc = 0;

        while pc < self.code.len() {
            let instr = &self.code[pc];
            pc += 1;

            if let Instr::Match { re, skip } = instr {
                caps = self.regexes[*re].captures(line);
                timestamp = now.timestamp();
                if caps.is_some() {
                    outcome.matched += 1;
                } else {
                    pc += skip;
                }
                continue;
            }

            // Non-match instructions only run right after a successful match.
            let Some(c) = caps.as_ref() else { continue };

            let (metric, labels, update) = match instr {
                Instr::Match { .. } => continue,
                Instr::Timestamp { capture, format } => {
                    let text = c.name(capture).map_or("", |m| m.as_str());
                    match parse_timestamp(text, format, syslog_use_current_year, now) {
                        Some(ts) => timestamp = ts,
                        None => {
                            debug!(program = %self.name, %text, %format, "unparseable timestamp; using processing time");
                        }
                    }
                    continue;
                }
                Instr::Inc { metric, labels } => (metric, labels, Update::Inc),
                Instr::Add {
                    metric,
                    labels,
                    value,
                } => match numeric_capture(c, value) {
                    Some(v) => (metric, labels, Update::Add(v)),
                    None => {
                        outcome.errors += 1;
                        continue;
                    }
                },
                Instr::Set {
                    metric,
                    labels,
                    value,
                } => match numeric_capture(c, value) {
                    Some(v) => (metric, labels, Update::Set(v)),
                    None => {
                        outcome.errors += 1;
                        continue;
                    }
                },
            };

            let label_values = labels
                .iter()
                .map(|l| c.name(l).map_or_else(String::new, |m| m.as_str().to_string()))
                .collect();
            match store.record(metric, label_values, update, timestamp).await {
                Ok(()) => outcome.updates += 1,
                Err(e) => {
                    outcome.errors += 1;
                    warn!(program = %self.name, error = %e, "metric update failed");
                }
            }
        }

        outcome
    }
}

fn numeric_capture(caps: &Captures<'_>, name: &str) -> Option<f64> {
    let text = caps.name(name)?.as_str();
    match text.trim().parse::<f64>() {
        Ok(v) => Some(v),
        Err(_) => {
            debug!(capture = name, %text, "capture is not numeric");
            None
        }
    }
}

/// Parse `text` with a chrono `format` into unix seconds.
///
/// Yearless formats (syslog style) get the current year prefixed when
/// `patch_year` is set; otherwise they cannot be parsed.
pub fn parse_timestamp(
    text: &str,
    format: &str,
    patch_year: bool,
    now: DateTime<Utc>,
) -> Option<i64> {
    if ZONE_SPECIFIERS.iter().any(|s| format.contains(s)) {
        return DateTime::parse_from_str(text, format)
            .ok()
            .map(|dt| dt.timestamp());
    }

    let has_year = YEAR_SPECIFIERS.iter().any(|s| format.contains(s));
    let parsed = if !has_year && patch_year {
        NaiveDateTime::parse_from_str(&format!("{} {text}", now.year()), &format!("%Y {format}"))
    } else {
        NaiveDateTime::parse_from_str(text, format)
    };
    parsed.ok().map(|dt| dt.and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use logwarp_metrics::Metric;

    use super::*;
    use crate::program::compile;

    const PROG: &str = r#"
[[metrics]]
name = "requests_total"
kind = "counter"
labels = ["method"]

[[metrics]]
name = "bytes_total"
kind = "counter"

[[metrics]]
name = "last_bytes"
kind = "gauge"

[[rules]]
pattern = '^(?P<ts>\w+ +\d+ \d+:\d+:\d+) (?P<method>[A-Z]+) (?P<bytes>\S+)$'
timestamp = { capture = "ts", format = "%b %e %H:%M:%S" }
actions = [
  { op = "inc", metric = "requests_total" },
  { op = "add", metric = "bytes_total", value = "bytes" },
  { op = "set", metric = "last_bytes", value = "bytes" },
]
"#;

    async fn setup() -> (Program, MetricsStore) {
        let program = compile("web.prog", PROG).unwrap();
        let store = MetricsStore::new();
        for m in program.metrics() {
            store
                .add(Metric::new(&m.name, program.name(), m.kind, m.labels.clone()))
                .await
                .unwrap();
        }
        (program, store)
    }

    #[tokio::test]
    async fn matching_line_updates_metrics() {
        let (program, store) = setup().await;

        let outcome = program.execute("Oct 19 12:00:00 GET 512", &store, true).await;
        assert_eq!(outcome, LineOutcome { matched: 1, updates: 3, errors: 0 });
        program.execute("Oct 19 12:00:01 GET 100", &store, true).await;
        program.execute("Oct 19 12:00:02 POST 7", &store, true).await;

        let requests = store.get("requests_total").await.unwrap();
        assert_eq!(requests.label_values.len(), 2);
        assert_eq!(requests.label_values[0].labels, vec!["GET"]);
        assert_eq!(requests.label_values[0].value, 2.0);

        let bytes = store.get("bytes_total").await.unwrap();
        assert_eq!(bytes.label_values[0].value, 619.0);
        assert_eq!(store.get("last_bytes").await.unwrap().label_values[0].value, 7.0);
    }

    #[tokio::test]
    async fn non_matching_line_skips_actions() {
        let (program, store) = setup().await;
        let outcome = program.execute("garbage", &store, true).await;
        assert_eq!(outcome, LineOutcome::default());
        assert!(store.get("requests_total").await.unwrap().label_values.is_empty());
    }

    #[tokio::test]
    async fn non_numeric_value_counts_as_error() {
        let (program, store) = setup().await;
        let outcome = program.execute("Oct 19 12:00:00 GET lots", &store, true).await;
        assert_eq!(outcome, LineOutcome { matched: 1, updates: 1, errors: 2 });
    }

    #[tokio::test]
    async fn timestamp_capture_stamps_updates() {
        let (program, store) = setup().await;
        program.execute("Jan  2 03:04:05 GET 1", &store, true).await;

        let year = Utc::now().year();
        let expected = Utc.with_ymd_and_hms(year, 1, 2, 3, 4, 5).unwrap().timestamp();
        let lv = &store.get("requests_total").await.unwrap().label_values[0];
        assert_eq!(lv.timestamp, expected);
    }

    #[test]
    fn yearless_timestamp_needs_patching() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let patched = parse_timestamp("Oct 19 12:00:00", "%b %e %H:%M:%S", true, now);
        assert_eq!(
            patched,
            Some(Utc.with_ymd_and_hms(2024, 10, 19, 12, 0, 0).unwrap().timestamp())
        );
        assert_eq!(parse_timestamp("Oct 19 12:00:00", "%b %e %H:%M:%S", false, now), None);
    }

    #[test]
    fn full_timestamps_parse_as_is() {
        let now = Utc::now();
        assert_eq!(
            parse_timestamp("2020-01-01 00:00:10", "%Y-%m-%d %H:%M:%S", true, now),
            Some(1_577_836_810)
        );
        assert_eq!(
            parse_timestamp("2020-01-01T00:00:10+01:00", "%Y-%m-%dT%H:%M:%S%:z", true, now),
            Some(1_577_833_210)
        );
        assert_eq!(parse_timestamp("1577836810", "%s", false, now), Some(1_577_836_810));
    }
}

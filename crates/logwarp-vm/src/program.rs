//! Program source format and compiler.
//!
//! A program is a TOML document declaring metrics and the rules that
//! update them:
//!
//! ```toml
//! [[metrics]]
//! name = "http_requests_total"
//! kind = "counter"
//! labels = ["method"]
//!
//! [[rules]]
//! pattern = '^(?P<method>[A-Z]+) (?P<bytes>\d+)$'
//! actions = [{ op = "inc", metric = "http_requests_total" }]
//! ```
//!
//! Compilation validates the whole program, collecting every error, and
//! lowers the rules into a flat instruction list.

use std::collections::HashSet;
use std::fmt::Write as _;

use logwarp_metrics::MetricKind;
use regex::Regex;
use serde::Deserialize;

use crate::error::{CompileError, CompileErrors};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProgramSource {
    #[serde(default)]
    metrics: Vec<MetricDecl>,
    #[serde(default)]
    rules: Vec<RuleSource>,
}

/// A metric declared by a program.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricDecl {
    pub name: String,
    pub kind: MetricKind,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleSource {
    pattern: String,
    timestamp: Option<TimestampSource>,
    #[serde(default)]
    actions: Vec<ActionSource>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimestampSource {
    capture: String,
    format: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Op {
    Inc,
    Add,
    Set,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Op::Inc => "inc",
            Op::Add => "add",
            Op::Set => "set",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActionSource {
    op: Op,
    metric: String,
    value: Option<String>,
}

/// One compiled instruction.
///
/// `labels` hold capture names, resolved against the captures of the most
/// recent successful `Match`.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Match the line against `regexes[re]`; on failure skip `skip` instructions.
    Match { re: usize, skip: usize },
    Timestamp { capture: String, format: String },
    Inc { metric: String, labels: Vec<String> },
    Add {
        metric: String,
        labels: Vec<String>,
        value: String,
    },
    Set {
        metric: String,
        labels: Vec<String>,
        value: String,
    },
}

/// A compiled program, ready to run against lines.
#[derive(Debug)]
pub struct Program {
    pub(crate) name: String,
    pub(crate) metrics: Vec<MetricDecl>,
    pub(crate) regexes: Vec<Regex>,
    pub(crate) code: Vec<Instr>,
}

impl Program {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &[MetricDecl] {
        &self.metrics
    }

    pub fn code(&self) -> &[Instr] {
        &self.code
    }

    /// Human-readable instruction listing.
    pub fn disassemble(&self) -> String {
        let mut out = format!("program {}\n", self.name);
        for m in &self.metrics {
            let _ = writeln!(
                out,
                "  metric {} {} [{}]",
                m.kind.as_str(),
                m.name,
                m.labels.join(", ")
            );
        }
        for (pc, instr) in self.code.iter().enumerate() {
            let text = match instr {
                Instr::Match { re, skip } => {
                    format!("match /{}/ else +{skip}", self.regexes[*re].as_str())
                }
                Instr::Timestamp { capture, format } => format!("timestamp {capture} {format:?}"),
                Instr::Inc { metric, labels } => format!("inc {metric} [{}]", labels.join(", ")),
                Instr::Add {
                    metric,
                    labels,
                    value,
                } => format!("add {metric} [{}] {value}", labels.join(", ")),
                Instr::Set {
                    metric,
                    labels,
                    value,
                } => format!("set {metric} [{}] {value}", labels.join(", ")),
            };
            let _ = writeln!(out, "  {pc:04} {text}");
        }
        out
    }
}

/// Compile program `name` from its TOML `source`.
pub fn compile(name: &str, source: &str) -> Result<Program, CompileErrors> {
    let parsed: ProgramSource =
        toml::from_str(source).map_err(|e| CompileErrors(vec![CompileError::Parse(e)]))?;

    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for m in &parsed.metrics {
        if !seen.insert(m.name.as_str()) {
            errors.push(CompileError::DuplicateMetric(m.name.clone()));
        }
    }

    let mut regexes = Vec::new();
    let mut code = Vec::new();

    for (rule_idx, rule) in parsed.rules.iter().enumerate() {
        let regex = match Regex::new(&rule.pattern) {
            Ok(re) => re,
            Err(source) => {
                errors.push(CompileError::InvalidPattern {
                    rule: rule_idx,
                    source,
                });
                continue;
            }
        };
        let captures: HashSet<String> = regex
            .capture_names()
            .flatten()
            .map(str::to_string)
            .collect();
        let require = |capture: &str, errors: &mut Vec<CompileError>| {
            if !captures.contains(capture) {
                errors.push(CompileError::MissingCapture {
                    rule: rule_idx,
                    capture: capture.to_string(),
                });
            }
        };

        let mut body = Vec::new();
        if let Some(ts) = &rule.timestamp {
            require(&ts.capture, &mut errors);
            body.push(Instr::Timestamp {
                capture: ts.capture.clone(),
                format: ts.format.clone(),
            });
        }

        for action in &rule.actions {
            let Some(decl) = parsed.metrics.iter().find(|m| m.name == action.metric) else {
                errors.push(CompileError::UnknownMetric {
                    rule: rule_idx,
                    metric: action.metric.clone(),
                });
                continue;
            };
            for label in &decl.labels {
                require(label, &mut errors);
            }

            let metric = decl.name.clone();
            let labels = decl.labels.clone();
            match (action.op, &action.value) {
                (Op::Inc, None) => body.push(Instr::Inc { metric, labels }),
                (Op::Inc, Some(_)) => errors.push(CompileError::UnexpectedValue {
                    rule: rule_idx,
                    metric,
                }),
                (op @ (Op::Add | Op::Set), None) => errors.push(CompileError::MissingValue {
                    rule: rule_idx,
                    op: op.as_str(),
                    metric,
                }),
                (op, Some(value)) => {
                    require(value, &mut errors);
                    let value = value.clone();
                    body.push(if matches!(op, Op::Add) {
                        Instr::Add {
                            metric,
                            labels,
                            value,
                        }
                    } else {
                        Instr::Set {
                            metric,
                            labels,
                            value,
                        }
                    });
                }
            }
        }

        code.push(Instr::Match {
            re: regexes.len(),
            skip: body.len(),
        });
        code.extend(body);
        regexes.push(regex);
    }

    if !errors.is_empty() {
        return Err(CompileErrors(errors));
    }

    Ok(Program {
        name: name.to_string(),
        metrics: parsed.metrics,
        regexes,
        code,
    })
}

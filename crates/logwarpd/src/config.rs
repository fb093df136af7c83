//! Command-line flags and the validated daemon configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use logwarp_metrics::ExporterOptions;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "logwarpd",
    about = "logwarp daemon — extract metrics from application logs",
    version
)]
pub struct Cli {
    /// HTTP port to listen on.
    #[arg(long, default_value_t = 3903)]
    pub port: u16,

    /// Comma separated list of files to monitor.
    #[arg(long, default_value = "")]
    pub logs: String,

    /// Directory containing programs (or a single program file).
    #[arg(long, default_value = "")]
    pub progs: String,

    /// Run once over the log files, dump the metrics as JSON, and exit.
    #[arg(long)]
    pub one_shot: bool,

    /// Compile programs only; exit with the number of compile errors.
    #[arg(long)]
    pub compile_only: bool,

    /// Print the instruction listing of every program and exit.
    #[arg(long)]
    pub dump_bytecode: bool,

    /// Patch yearless timestamps with the present year.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub syslog_use_current_year: bool,

    /// How often tailed files are checked for new lines, in milliseconds.
    #[arg(long, default_value_t = 250)]
    pub poll_interval_ms: u64,

    /// Graphite plaintext sink (host:port) to push metrics to.
    #[arg(long)]
    pub graphite_addr: Option<String>,

    /// statsd sink (host:port) to push metrics to.
    #[arg(long)]
    pub statsd_addr: Option<String>,

    /// Metric push interval in seconds.
    #[arg(long, default_value_t = 60)]
    pub push_interval: u64,

    /// Prefix for pushed metric names.
    #[arg(long, default_value = "")]
    pub metric_prefix: String,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Operating mode. Exactly one per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Process the inputs to completion, print the metrics, exit.
    OneShot,
    /// Tail the inputs and serve HTTP until told to stop.
    Daemon,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub logs: Vec<PathBuf>,
    pub progs: PathBuf,
    pub mode: Mode,
    pub compile_only: bool,
    pub dump_bytecode: bool,
    pub syslog_use_current_year: bool,
    pub poll_interval: Duration,
    pub exporter: ExporterOptions,
}

impl Config {
    /// Build and validate the configuration from parsed flags.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        if cli.progs.is_empty() {
            return Err(ConfigError::MissingProgs);
        }
        if cli.logs.is_empty() {
            return Err(ConfigError::MissingLogs);
        }

        let config = Self {
            port: cli.port,
            logs: parse_log_paths(&cli.logs),
            progs: PathBuf::from(&cli.progs),
            mode: if cli.one_shot {
                Mode::OneShot
            } else {
                Mode::Daemon
            },
            compile_only: cli.compile_only,
            dump_bytecode: cli.dump_bytecode,
            syslog_use_current_year: cli.syslog_use_current_year,
            poll_interval: Duration::from_millis(cli.poll_interval_ms),
            exporter: ExporterOptions {
                graphite: cli.graphite_addr.clone(),
                statsd: cli.statsd_addr.clone(),
                push_interval: Duration::from_secs(cli.push_interval),
                prefix: cli.metric_prefix.clone(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.progs.as_os_str().is_empty() {
            return Err(ConfigError::MissingProgs);
        }
        if self.logs.is_empty() {
            return Err(ConfigError::NoLogs);
        }
        Ok(())
    }

    /// Whether the process only compiles programs and exits.
    pub fn compile_only_run(&self) -> bool {
        self.compile_only || self.dump_bytecode
    }
}

/// Split a comma separated path list, discarding empty entries.
pub fn parse_log_paths(raw: &str) -> Vec<PathBuf> {
    raw.split(',')
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["logwarpd"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults() {
        let cli = cli(&[]);
        assert_eq!(cli.port, 3903);
        assert!(cli.syslog_use_current_year);
        assert!(!cli.one_shot);
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn missing_progs_is_rejected_first() {
        assert_eq!(Config::from_cli(&cli(&[])).unwrap_err(), ConfigError::MissingProgs);
    }

    #[test]
    fn missing_logs_is_rejected() {
        let err = Config::from_cli(&cli(&["--progs", "/progs"])).unwrap_err();
        assert_eq!(err, ConfigError::MissingLogs);
    }

    #[test]
    fn separator_only_logs_are_rejected() {
        let err = Config::from_cli(&cli(&["--progs", "/progs", "--logs", ",,"])).unwrap_err();
        assert_eq!(err, ConfigError::NoLogs);
    }

    #[test]
    fn log_list_drops_empty_entries() {
        assert_eq!(
            parse_log_paths("/tmp/a.log,,/tmp/b.log,"),
            vec![PathBuf::from("/tmp/a.log"), PathBuf::from("/tmp/b.log")]
        );
    }

    #[test]
    fn one_shot_selects_mode() {
        let config = Config::from_cli(&cli(&[
            "--progs",
            "/progs",
            "--logs",
            "/tmp/a.log,/tmp/b.log",
            "--one-shot",
        ]))
        .unwrap();
        assert_eq!(config.mode, Mode::OneShot);
        assert_eq!(config.logs.len(), 2);

        let config = Config::from_cli(&cli(&["--progs", "/p", "--logs", "/l"])).unwrap();
        assert_eq!(config.mode, Mode::Daemon);
    }

    #[test]
    fn flags_map_onto_config() {
        let config = Config::from_cli(&cli(&[
            "--progs",
            "/p",
            "--logs",
            "/l",
            "--dump-bytecode",
            "--syslog-use-current-year",
            "false",
            "--poll-interval-ms",
            "10",
            "--graphite-addr",
            "127.0.0.1:2003",
            "--metric-prefix",
            "lw.",
        ]))
        .unwrap();
        assert!(config.compile_only_run());
        assert!(!config.syslog_use_current_year);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.exporter.graphite.as_deref(), Some("127.0.0.1:2003"));
        assert_eq!(config.exporter.prefix, "lw.");
    }
}

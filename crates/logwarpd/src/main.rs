use clap::Parser;
use logwarpd::{Cli, Config, LogFormat, Outcome};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,logwarpd=debug,logwarp=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    // stdout carries the one-shot JSON and bytecode listings.
    let fmt = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Text => fmt.init(),
        LogFormat::Json => fmt.json().init(),
    }

    let config = Config::from_cli(&cli)?;
    let mut stdout = std::io::stdout();
    match logwarpd::run(config, &mut stdout).await? {
        Outcome::Compiled { errors } => {
            std::process::exit(i32::try_from(errors).unwrap_or(i32::MAX));
        }
        Outcome::OneShot | Outcome::Stopped => Ok(()),
    }
}

mod bridge;

use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relay_config::{load_config, Config};
use relay_core::logging::{level_filter, prepare_log_file, LogRotation};

use crate::bridge::{state_dir, Bridge, LineSink};

/// Environment variable overriding the configured log filter.
const LOG_ENV: &str = "RELAY_LOG";

const USAGE: &str = "usage: relay [--config-dir DIR] [--project DIR] [--log-dir DIR]";

#[derive(Debug, Default, PartialEq)]
struct Args {
    config_dir: Option<PathBuf>,
    project_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    help: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .map(PathBuf::from)
                .with_context(|| format!("{flag} needs a value"))
        };
        match arg.as_str() {
            "--config-dir" => parsed.config_dir = Some(value("--config-dir")?),
            "--project" => parsed.project_dir = Some(value("--project")?),
            "--log-dir" => parsed.log_dir = Some(value("--log-dir")?),
            "-h" | "--help" => parsed.help = true,
            other => bail!("unknown argument: {other}\n{USAGE}"),
        }
    }
    Ok(parsed)
}

/// Log to a rotated file; stdout carries protocol traffic.
fn init_logging(log_dir: &Path, config: &Config) -> Result<()> {
    let log_path = prepare_log_file(log_dir)
        .with_context(|| format!("cannot create log directory {}", log_dir.display()))?;
    if let Err(e) = LogRotation::default().rotate(&log_path) {
        eprintln!("relay: log rotation failed: {e}");
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("cannot open log file {}", log_path.display()))?;

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(level_filter(config.log.level.as_str())));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let config_dir = match args.config_dir {
        Some(dir) => dir,
        None => dirs::config_dir()
            .context("cannot determine config directory")?
            .join("relay"),
    };
    let project_dir = args.project_dir.or_else(|| env::current_dir().ok());

    let loaded = load_config(&config_dir, project_dir.as_deref());
    let config = loaded.as_ref().cloned().unwrap_or_default();

    let log_dir = args
        .log_dir
        .unwrap_or_else(|| state_dir(&config_dir).join("logs"));
    init_logging(&log_dir, &config)?;
    if let Err(e) = &loaded {
        error!("config load failed, using defaults: {}", e);
    }
    info!(
        "relay {} starting with {} languages, {} projects",
        env!("CARGO_PKG_VERSION"),
        config.languages.len(),
        config.projects.len()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    runtime.block_on(async {
        let sink = Arc::new(LineSink::new(Box::new(std::io::stdout())));
        let bridge = Arc::new(Bridge::new(config, state_dir(&config_dir), sink.clone())?);
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        bridge.serve(stdin, sink).await
    })?;
    info!("relay stopped");
    Ok(())
}

fn main() {
    let args = match parse_args(env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("relay: {:#}", e);
            std::process::exit(2);
        }
    };
    if args.help {
        println!("{USAGE}");
        return;
    }

    if let Err(e) = run(args) {
        eprintln!("relay: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_directories() {
        let parsed = args(&["--config-dir", "/c", "--project", "/p"]).unwrap();
        assert_eq!(parsed.config_dir, Some(PathBuf::from("/c")));
        assert_eq!(parsed.project_dir, Some(PathBuf::from("/p")));
        assert_eq!(parsed.log_dir, None);
    }

    #[test]
    fn rejects_unknown_and_incomplete_flags() {
        assert!(args(&["--verbose"]).is_err());
        assert!(args(&["--log-dir"]).is_err());
        assert!(args(&["-h"]).unwrap().help);
    }
}

//! scrapeflowd — the scrapeflow daemon.
//!
//! Discovers metrics endpoints per category, polls each one on its own
//! worker and forwards every scrape to Elasticsearch until SIGINT/SIGTERM.
//!
//! # Usage
//!
//! ```text
//! scrapeflowd --config /etc/scrapeflow/scrapeflow.toml --worker 8
//! ```

mod agent;
mod echo;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "scrapeflowd",
    version,
    about = "Scrape metrics endpoints and forward them to Elasticsearch"
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "scrapeflow.toml")]
    config: PathBuf,

    /// Sink username; overrides `sink.username`.
    #[arg(long)]
    username: Option<String>,

    /// Sink password; overrides `sink.password`.
    #[arg(long)]
    password: Option<String>,

    /// Concurrent sink writes; overrides `forwarder.concurrency`.
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    worker: Option<u16>,

    /// Log level. `RUST_LOG` takes precedence when set.
    #[arg(long, value_enum, ignore_case = true, default_value = "info")]
    log_level: LogLevel,

    /// Debug logging, and print every scrape result to stdout.
    #[arg(long)]
    debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Cli {
    /// `--debug` raises the level to at least debug.
    fn effective_log_level(&self) -> LogLevel {
        if self.debug && self.log_level != LogLevel::Trace {
            LogLevel::Debug
        } else {
            self.log_level
        }
    }

    fn into_options(self) -> agent::Options {
        agent::Options {
            config: self.config,
            username: self.username,
            password: self.password,
            worker: self.worker.map(usize::from),
            debug: self.debug,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = cli.effective_log_level();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str())),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        log_level = level.as_str(),
        "scrapeflowd starting"
    );

    match agent::run(cli.into_options()).await {
        Ok(()) => {
            info!("scrapeflowd stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "fatal error, exiting");
            ExitCode::FAILURE
        }
    }
}

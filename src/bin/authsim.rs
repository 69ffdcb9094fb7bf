//! authsim - mock OAuth audit and OS metric log generator
//!
//! Usage:
//!   authsim run --log-dir /var/log/mock
//!   authsim run --hosts idp1,idp2 --time-scale 0.01 --duration 30m
//!   authsim config --config overrides.json

use anyhow::{Context, Result};
use authsim::{SimConfig, Simulator};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "authsim")]
#[command(about = "Synthetic audit and OS metric logs for a mock OAuth service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate logs until interrupted (the default)
    Run(RunArgs),

    /// Print the effective configuration as JSON
    Config(ConfigArgs),
}

#[derive(Args, Default)]
struct ConfigArgs {
    /// JSON config file; missing fields keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory the log files are written to
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Simulated hosts (comma-separated)
    #[arg(long, value_delimiter = ',')]
    hosts: Option<Vec<String>>,

    /// Wall-clock seconds per simulated second
    #[arg(long)]
    time_scale: Option<f64>,

    /// Disable the daily usage ramp
    #[arg(long)]
    no_ramp: bool,
}

#[derive(Args, Default)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Stop after this long (e.g., 5m, 1h, 30s)
    #[arg(short, long, value_parser = parse_duration)]
    duration: Option<Duration>,

    /// Log filter, overrides RUST_LOG (e.g., info, authsim=debug)
    #[arg(long)]
    log_level: Option<String>,
}

impl ConfigArgs {
    fn load(&self) -> Result<SimConfig> {
        let mut config = match &self.config {
            Some(path) => SimConfig::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => SimConfig::default(),
        };

        if let Some(dir) = &self.log_dir {
            config.log_dir = dir.clone();
        }
        if let Some(hosts) = &self.hosts {
            config.hosts = hosts.clone();
        }
        if let Some(scale) = self.time_scale {
            config.time_scale = scale;
        }
        if self.no_ramp {
            config.usage.enabled = false;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or_else(|| Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run(args),
        Commands::Config(args) => {
            let config = args.load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn run(args: RunArgs) -> Result<()> {
    let filter = match &args.log_level {
        Some(level) => EnvFilter::try_new(level).context("invalid --log-level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.config.load()?;
    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;

    runtime.block_on(async move {
        let simulator = Simulator::start(config).context("starting simulator")?;

        match args.duration {
            Some(limit) => {
                tokio::select! {
                    _ = shutdown_signal() => {}
                    _ = tokio::time::sleep(limit) => info!(?limit, "run duration reached"),
                }
            }
            None => shutdown_signal().await,
        }

        simulator.shutdown().await.context("shutting down")?;
        Ok(())
    })
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (value, unit) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&s[..i], c),
        _ => (s, 's'),
    };
    let value: u64 = value
        .parse()
        .map_err(|_| format!("invalid duration: {s}"))?;
    let multiplier: u64 = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        _ => return Err(format!("unknown duration unit in {s}, expected s, m or h")),
    };
    let secs = value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("invalid duration: {s}"))?;
    Ok(Duration::from_secs(secs))
}

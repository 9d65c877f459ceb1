//! autostop CLI
//!
//! Command-line entry point for the MLflow run watchdog.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use autostop::alerting::{evaluate, NotificationGateway};
use autostop::config::{load_dotenv, resolve_config_path};
use autostop::models::{Decision, WatchTarget};
use autostop::tracking::{MlflowClient, TrackingClient};
use autostop::watcher::{FleetScanner, FleetWatcher, RunWatcher, WatchContext, WatchSettings};
use autostop::Config;

/// autostop - stop MLflow runs whose metrics exceed their limits
#[derive(Parser)]
#[command(name = "autostop")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (falls back to AUTOSTOP_CONFIG, which may be
    /// set in the env file)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Dotenv file applied before configuration is read
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch runs until they end or Ctrl+C
    Watch {
        /// Watch a single run
        #[arg(long, conflicts_with = "experiment_id")]
        run_id: Option<String>,

        /// Watch every running run of an experiment
        #[arg(long)]
        experiment_id: Option<String>,
    },

    /// Evaluate one run once without notifying or stopping it
    Check {
        /// Run to evaluate
        #[arg(long)]
        run_id: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // The env file has to be applied before configuration reads the environment
    let dotenv = load_dotenv(&cli.env_file);

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_tracing(&config, cli.verbose) {
        eprintln!("Error initializing logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match dotenv {
        Ok(Some(path)) => debug!(path = %path.display(), "Loaded env file"),
        Ok(None) => warn!(file = %cli.env_file.display(), "No env file found, using process environment"),
        Err(e) => warn!(error = %e, "Could not apply env file"),
    }

    let result = match cli.command {
        Commands::Watch {
            run_id,
            experiment_id,
        } => run_watch(config, WatchTarget::from_options(run_id, experiment_id)).await,
        Commands::Check { run_id } => run_check(config, &run_id).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let path = resolve_config_path(explicit);
    let config = Config::load(path.as_deref()).with_context(|| match &path {
        Some(path) => format!("failed to load {}", path.display()),
        None => "failed to load configuration from the environment".to_string(),
    })?;

    Ok(config)
}

fn init_tracing(config: &Config, verbose: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        let level = if verbose { "debug" } else { config.logging.level.as_str() };
        EnvFilter::try_new(level)
    })?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if config.logging.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| anyhow::anyhow!(e))
}

fn http_client(config: &Config) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.tracking.request_timeout())
        .build()
        .context("failed to build HTTP client")
}

async fn run_watch(config: Config, target: WatchTarget) -> anyhow::Result<()> {
    let client = http_client(&config)?;
    let tracking: Arc<dyn TrackingClient> =
        Arc::new(MlflowClient::new(client.clone(), &config.tracking.uri)?);
    let gateway = NotificationGateway::from_config(&config.notifications, client);

    info!(
        tracking_uri = %config.tracking.uri,
        watch_target = %target,
        thresholds = config.watch.metric_thresholds.len(),
        channels = %config.notifications.channels,
        "Starting autostop"
    );
    if config.watch.metric_thresholds.is_empty() {
        warn!("No metric thresholds configured, runs will never be stopped");
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            signal.cancel();
        }
    });

    let settings = WatchSettings {
        poll_interval: config.watch.poll_interval(),
        channels: config.notifications.channels,
        diagnostics: config.watch.diagnostics,
    };
    let ctx = WatchContext::new(
        tracking.clone(),
        Arc::new(gateway),
        config.watch.metric_thresholds,
        settings,
        shutdown,
    );

    match target {
        WatchTarget::Run(run_id) => {
            let outcome = RunWatcher::new(run_id.as_str(), ctx).run().await;
            info!(run_id = %run_id, outcome = %outcome, "Run watch finished");
        }
        target => {
            FleetWatcher::new(FleetScanner::new(target, tracking), ctx)
                .run()
                .await;
        }
    }

    Ok(())
}

async fn run_check(config: Config, run_id: &str) -> anyhow::Result<()> {
    let client = MlflowClient::new(http_client(&config)?, &config.tracking.uri)?;
    let snapshot = client
        .get_run(run_id)
        .await
        .with_context(|| format!("failed to fetch run {run_id}"))?;

    println!("Run {} ({})", snapshot.run_id, snapshot.status);
    for reading in snapshot.latest_readings() {
        match config.watch.metric_thresholds.get(&reading.key) {
            Some(threshold) => println!("  {} = {:.4} (limit {threshold:.4})", reading.key, reading.value),
            None => println!("  {} = {:.4}", reading.key, reading.value),
        }
    }

    match evaluate(&snapshot, &config.watch.metric_thresholds) {
        Decision::Stop(breach) => println!("Would stop: {breach}"),
        Decision::Continue if snapshot.is_running() => println!("Within thresholds"),
        Decision::Continue => println!("Not running, nothing to do"),
    }

    Ok(())
}

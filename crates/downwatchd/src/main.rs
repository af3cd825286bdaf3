//! downwatchd — the downwatch daemon.
//!
//! Loads `downwatch.toml`, opens the outcome store and runs the
//! probe → reconcile → alert cycle, either once per invocation (for an
//! external scheduler) or on its own interval.
//!
//! # Usage
//!
//! ```text
//! downwatchd --config /etc/downwatch/downwatch.toml run
//! downwatchd watch --interval 5m
//! downwatchd history --target homepage --limit 10
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use downwatch_core::{Config, parse_duration};
use downwatch_engine::{DispatchStatus, Orchestrator, RunReport};
use downwatch_notify::{AlertPrefixes, LogNotifier, Notifier, WebhookNotifier};
use downwatch_probe::Prober;
use downwatch_state::{OpenStore, OutcomeStore, StateStore, StorePath};
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(name = "downwatchd", about = "Edge-triggered availability alerts", version)]
struct Cli {
    /// Configuration file; `<stem>.local.toml` next to it overrides it.
    #[arg(short, long, global = true, default_value = "downwatch.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe every target once, record outcomes and alert on changes.
    Run,
    /// Repeat `run` on a fixed interval until interrupted.
    Watch {
        /// Time between runs ("30s", "5m", ...).
        #[arg(long, default_value = "5m")]
        interval: String,
    },
    /// Show recorded outcomes for a target, most recent first.
    History {
        #[arg(long)]
        target: String,
        #[arg(long, default_value = "20")]
        limit: usize,
        /// Print outcomes as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List configured targets and their expectations.
    Targets,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Command::Run => {
            // One run per process: the store is released when it exits.
            let store: Arc<dyn OutcomeStore> = Arc::new(open_store(&config.settings.store_path)?);
            let orchestrator = build_orchestrator(&config, Arc::new(store))?;
            let report = orchestrator.run(&config.targets).await;
            print!("{}", render_report(&report));
            Ok(())
        }
        Command::Watch { interval } => run_watch(&config, &interval).await,
        Command::History {
            target,
            limit,
            json,
        } => {
            let store = open_store(&config.settings.store_path)?;
            let outcomes = store.history(&target, limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcomes)?);
            } else if outcomes.is_empty() {
                println!("no outcomes recorded for `{target}`");
            } else {
                for outcome in outcomes {
                    let state = if outcome.is_exceptional { "DOWN" } else { "UP" };
                    println!("{} {:<4} {}", outcome.timestamp, state, outcome.message());
                }
            }
            Ok(())
        }
        Command::Targets => {
            for target in &config.targets {
                let text = target.expected_body_text.as_deref().unwrap_or("-");
                println!(
                    "{}\t{}\texpect {}\ttext {}",
                    target.name, target.url, target.expected_status_code, text
                );
            }
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,downwatchd=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_store(path: &Path) -> anyhow::Result<StateStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = StateStore::open(path)?;
    info!(path = ?path, "outcome store opened");
    Ok(store)
}

/// Wire store, prober and notifier together from configuration.
fn build_orchestrator(config: &Config, stores: Arc<dyn OpenStore>) -> anyhow::Result<Orchestrator> {
    let prober = Prober::from_config(&config.probe).context("building HTTP client")?;

    let notifier: Arc<dyn Notifier> = match &config.settings.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.as_str(), config.notify.timeout)?),
        None => {
            info!("no webhook configured; alerts will only be logged");
            Arc::new(LogNotifier)
        }
    };

    Ok(Orchestrator::opening(
        Arc::new(prober),
        stores,
        notifier,
        config.settings.topic.as_str(),
        AlertPrefixes::from(&config.settings),
    )
    .with_origin(config.settings.origin.clone()))
}

async fn run_watch(config: &Config, interval: &str) -> anyhow::Result<()> {
    let interval = parse_interval(interval)?;
    // Fail fast on an unusable path, then let go of the file so `history`
    // and scheduled `run`s can open it between ticks.
    drop(open_store(&config.settings.store_path)?);
    let stores = Arc::new(StorePath::new(&config.settings.store_path));
    let orchestrator = build_orchestrator(config, stores)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    info!(interval_secs = interval.as_secs(), targets = config.targets.len(), "watching");
    orchestrator
        .run_periodically(&config.targets, interval, shutdown_rx)
        .await;
    info!("downwatchd stopped");
    Ok(())
}

fn parse_interval(value: &str) -> anyhow::Result<Duration> {
    match parse_duration(value) {
        Some(d) if !d.is_zero() => Ok(d),
        _ => bail!("invalid interval `{value}`"),
    }
}

/// Human summary of a run for stdout.
fn render_report(report: &RunReport) -> String {
    let mut out = format!(
        "probed {} target(s): {} exceptional, {} notified, {} failure(s)\n",
        report.probed,
        report.exceptional().count(),
        report.notified().count(),
        report.failures.len()
    );
    for result in &report.results {
        let state = if result.current_outcome.is_exceptional { "DOWN" } else { "UP" };
        out.push_str(&format!(
            "  {:<4} {}: {}\n",
            state,
            result.target.name,
            result.current_outcome.message()
        ));
    }
    for failure in &report.failures {
        out.push_str(&format!("  FAIL {}: {}\n", failure.target, failure.error));
    }
    match &report.dispatch {
        DispatchStatus::NotNeeded => out.push_str("no state changes; nothing sent\n"),
        DispatchStatus::Sent => {
            if let Some(alert) = &report.alert {
                out.push_str(&format!("alert sent: {}\n", alert.subject));
            }
        }
        DispatchStatus::Failed(e) => out.push_str(&format!("alert NOT sent: {e}\n")),
    }
    out
}

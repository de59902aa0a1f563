/*
[INPUT]:  CLI arguments, YAML configuration file, environment, OS shutdown signals
[OUTPUT]: A running connection session with periodic health reports and graceful shutdown
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use marketwire_monitor::{HealthChange, HealthWatch, MonitorConfig, StreamTally, summarize};
use marketwire_stream::{ConnectionSession, SessionEvent};

#[derive(Parser, Debug)]
#[command(name = "marketwire-monitor", version, about = "Market stream connection monitor")]
struct Cli {
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,
    /// Streams to watch; replaces the configured list
    #[arg(long = "stream", value_name = "STREAM")]
    streams: Vec<String>,
    #[arg(long = "log-level", value_name = "LEVEL")]
    log_level: Option<String>,
    /// Write daily rolling log files into this directory
    #[arg(long = "log-dir", value_name = "DIR")]
    log_dir: Option<PathBuf>,
    /// Print the effective configuration and exit
    #[arg(long = "dry-run")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let mut config = MonitorConfig::load(args.config_path.as_deref()).context("load config")?;
    if !args.streams.is_empty() {
        config.streams = args.streams.clone();
    }
    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }
    if let Some(dir) = &args.log_dir {
        config.log.dir = Some(dir.display().to_string());
    }
    config.validate()?;

    let _log_guard = init_tracing(&config)?;
    info!(
        config_path = ?args.config_path,
        streams = config.streams.len(),
        dry_run = args.dry_run,
        "starting marketwire-monitor"
    );

    if args.dry_run {
        println!("{}", config.to_yaml()?);
        info!("dry-run requested; configuration validated");
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let session = ConnectionSession::new(config.to_session_config()).context("create session")?;
    let tally = Arc::new(StreamTally::new());

    let recorder = Arc::clone(&tally);
    let _streams = session.connect_to_streams(&config.streams, move |message| recorder.record(message));

    let watch = HealthWatch::new(config.health_warn_below);
    let _metrics = session.add_metrics_listener(move |metrics| match watch.observe(metrics) {
        Some(HealthChange::Degraded { score }) => {
            warn!(score, state = %metrics.state, circuit = %metrics.circuit, "connection health degraded");
        }
        Some(HealthChange::Recovered { score }) => info!(score, "connection health recovered"),
        None => {}
    });

    let events = tokio::spawn(log_events(session.subscribe_events(), shutdown.clone()));
    session.connect();

    let mut report = tokio::time::interval(config.report_interval());
    report.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = report.tick() => info!("{}", summarize(&session.metrics(), &tally.snapshot())),
        }
    }

    info!("shutdown signal received");
    session.shutdown().await;
    if let Err(err) = events.await {
        warn!(error = %err, "event logger ended abnormally");
    }
    let totals = tally.totals();
    info!(live = totals.live, fallback = totals.fallback, "session shutdown complete");

    Ok(())
}

async fn log_events(
    mut events: tokio::sync::broadcast::Receiver<SessionEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(SessionEvent::Error { kind, message }) => warn!(%kind, error = %message, "session error"),
            Ok(SessionEvent::Reconnect {
                attempt,
                max_attempts,
                delay,
            }) => {
                info!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, "reconnecting");
            }
            Ok(SessionEvent::StateChange { from, to }) => debug!(%from, %to, "state change"),
            Ok(SessionEvent::Message { .. }) => {}
            Ok(other) => debug!(event = other.name(), "session event"),
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "event log lagging"),
            Err(RecvError::Closed) => return,
        }
    }
}

fn init_tracing(config: &MonitorConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(&config.log.level).context("invalid log level")?;
    let console = tracing_subscriber::fmt::layer().with_target(true);

    let (file, guard) = match &config.log.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(Path::new(dir), &config.log.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(guard)
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown_clone.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}

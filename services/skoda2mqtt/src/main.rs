//! skoda2mqtt
//!
//! Long-running bridge that:
//! 1. Logs in to the vendor identity provider like the mobile app does
//! 2. Polls every vehicle on the account for its stored status
//! 3. Publishes the readings to an MQTT broker with Home Assistant discovery

mod catalog;
mod config;
mod error;
mod metrics;
mod mqtt;
mod poller;
mod publish;
mod scheduler;

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use skoda_http::Executor;
use skoda_session::{Endpoints, Session};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, write_sample};
use crate::mqtt::MqttSink;
use crate::scheduler::{PollLoop, Scheduler};

#[derive(Debug, Parser)]
#[command(name = "skoda2mqtt", version, about = "Publish Skoda Connect vehicle status to MQTT")]
struct Cli {
    /// Also write logs to this file
    #[arg(short = 'f', long)]
    logfile: Option<PathBuf>,

    /// Log level or filter directive (e.g. `debug`, `skoda_auth=trace`)
    #[arg(short = 'l', long)]
    loglevel: Option<String>,

    /// Configuration file
    #[arg(short = 'c', long, default_value = "config.json")]
    configfile: PathBuf,
}

/// Build the level filter: `--loglevel`, then `RUST_LOG`, then `info`.
fn level_filter(loglevel: Option<&str>) -> EnvFilter {
    loglevel
        .and_then(|level| EnvFilter::try_new(level.to_ascii_lowercase()).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Install the stderr subscriber plus an optional non-blocking file layer.
/// The returned guard flushes the file writer when dropped.
fn init_tracing(cli: &Cli) -> Option<WorkerGuard> {
    let (file_layer, guard) = match &cli.logfile {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let name = path.file_name().unwrap_or(OsStr::new("skoda2mqtt.log"));
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(level_filter(cli.loglevel.as_deref()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

/// Load the config; on failure write a sample next to it and give up.
fn load_config(path: &Path) -> Result<Config> {
    match Config::load(path) {
        Ok(config) => Ok(config),
        Err(e) => {
            if e.is_not_found() {
                error!(path = %path.display(), "configuration file not found");
            } else {
                error!(path = %path.display(), error = %e, "configuration invalid");
            }
            match write_sample(path) {
                Ok(sample) => info!(path = %sample.display(), "sample configuration written"),
                Err(write_err) => warn!(error = %write_err, "could not write sample configuration"),
            }
            let context = format!("failed to load config from {}", path.display());
            Err(anyhow::Error::new(e).context(context))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "starting skoda2mqtt");

    let config = load_config(&cli.configfile)?;
    info!(
        broker = %config.broker,
        namespace = %config.namespace,
        poll_interval_secs = config.poll_interval_secs,
        request_status_updates = config.request_status_updates,
        "configuration loaded"
    );

    if let Some(listen) = config.metrics_listen {
        metrics::install_exporter(listen)
            .with_context(|| format!("failed to start metrics exporter on {listen}"))?;
        info!(addr = %listen, "metrics exporter listening");
    }

    let executor = Executor::new().context("failed to build HTTP client")?;
    let session = Arc::new(Session::new(
        executor,
        config.client_profile(),
        config.credentials(),
        Endpoints::default(),
        config.template_vars(),
    ));

    let client_id = format!("skoda2mqtt-{}", uuid::Uuid::new_v4().as_simple());
    let (sink, mqtt_task) =
        MqttSink::connect(&config.broker, &client_id).context("failed to configure MQTT client")?;
    let sink = Arc::new(sink);

    if let Err(e) = session.ensure_authenticated().await {
        warn!(error = %e, "initial login failed, retrying from the poll loop");
    }

    let poll = PollLoop::new(
        session.clone(),
        sink.clone(),
        config.namespace.clone(),
        config.request_status_updates,
    );
    Scheduler::new(
        session,
        poll,
        config.poll_interval(),
        config.refresh_interval(),
    )
    .run(shutdown_signal())
    .await;

    sink.disconnect().await;
    mqtt_task.abort();

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

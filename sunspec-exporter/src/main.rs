//! Prometheus exporter for SunSpec devices.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use sunspec_common::ProcessEnv;
use sunspec_exporter::shutdown::{self, SignalListener};
use sunspec_exporter::{ExporterConfig, HttpServer, MetricRegistry, ModbusConnector, Supervisor};

/// Prometheus exporter for SunSpec devices.
#[derive(Parser, Debug)]
#[command(name = "sunspec-exporter")]
#[command(about = "Export SunSpec device readings as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error), overrides config and LOG_LEVEL.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => ExporterConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => ExporterConfig::default(),
    };
    let fallbacks = config.apply_env(&ProcessEnv);
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    sunspec_common::init_tracing(&config.logging)?;

    for fallback in &fallbacks {
        warn!(%fallback, "Ignoring malformed environment variable");
    }

    info!("Starting SunSpec Prometheus Exporter");

    // Installed first so a signal during startup still exits cleanly.
    let mut signals = SignalListener::install().context("Cannot install signal handlers")?;

    let registry = MetricRegistry::shared();
    let (trigger, shutdown) = shutdown::channel();

    // Bind before touching the device so a port conflict stops us here.
    let listen_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.http.listen_port));
    let server = HttpServer::new(
        registry.clone(),
        listen_addr,
        config.http.metrics_path.clone(),
    )
    .bind()
    .await
    .context("Cannot start metrics server")?;

    let http_shutdown = shutdown.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = server.serve(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    let mut supervisor = Supervisor::new(
        ModbusConnector,
        config.device.clone(),
        &config.poll,
        registry.clone(),
        shutdown.clone(),
    );
    let supervisor_task = tokio::spawn(async move { supervisor.run().await });

    if let Err(e) = signals.recv().await {
        error!("Failed to listen for shutdown signals: {}", e);
    }
    trigger.trigger();

    // An in-flight read is bounded by the device timeout.
    let grace = config.device.timeout() + Duration::from_secs(2);
    if tokio::time::timeout(grace, async {
        let _ = supervisor_task.await;
        let _ = http_task.await;
    })
    .await
    .is_err()
    {
        warn!(grace_ms = grace.as_millis() as u64, "Tasks did not stop in time");
    }

    info!(metrics = registry.len(), "Exporter stopped");
    Ok(())
}

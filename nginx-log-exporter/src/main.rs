//! Prometheus exporter for nginx access logs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use nginx_log_exporter::{
    Aggregator, Args, HttpServer, LogFollower, MetricRegistry, Pipeline, init_tracing,
};

/// How often pending histogram samples are folded in between scrapes.
const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;

    init_tracing(&config.logging)?;

    info!("Starting nginx log exporter");

    let plan = config.compile_format()?;
    info!(fields = plan.len_fields(), "Compiled log format");

    let registry = Arc::new(
        MetricRegistry::new(&config.metrics).context("Failed to build metric registry")?,
    );

    let follower = LogFollower::start(&config.log.filename, config.log.follower()).await?;
    info!(file = %config.log.filename.display(), "Following log file");

    let listen_addr: SocketAddr = config
        .web
        .listen
        .parse()
        .with_context(|| format!("Invalid listen address: {}", config.web.listen))?;
    let http_server =
        HttpServer::bind(registry.clone(), listen_addr, config.web.path.clone()).await?;

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (lines, follow_errors) = follower.into_parts();
    let aggregator = Aggregator::new(registry.clone(), &plan);
    let pipeline_task = tokio::spawn(Pipeline::new(plan, aggregator).run(lines));
    let mut http_task = tokio::spawn(http_server.run(shutdown_rx.clone()));

    // Start upkeep task
    let upkeep_registry = registry.clone();
    let mut upkeep_shutdown = shutdown_rx;
    let upkeep_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPKEEP_INTERVAL);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    upkeep_registry.run_upkeep();
                }
                _ = upkeep_shutdown.changed() => {
                    if *upkeep_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    let outcome = tokio::select! {
        result = follow_errors => Err(match result {
            Ok(e) => anyhow::Error::new(e).context("Log follower stopped"),
            Err(_) => anyhow::anyhow!("Log follower stopped unexpectedly"),
        }),
        result = &mut http_task => Err(match result {
            Ok(Ok(())) => anyhow::anyhow!("HTTP server stopped unexpectedly"),
            Ok(Err(e)) => e,
            Err(e) => anyhow::Error::new(e).context("HTTP server task failed"),
        }),
        signal = shutdown_signal() => signal.map(|name| {
            info!(signal = name, "Received signal, shutting down...");
        }),
    };

    if let Err(e) = &outcome {
        error!("{:#}", e);
    }

    // Signal shutdown
    let _ = shutdown_tx.send(true);
    pipeline_task.abort();
    let _ = upkeep_task.await;

    if !http_task.is_finished() {
        let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;
    }

    // Print final stats
    let stats = registry.stats.snapshot();
    info!(
        lines_received = stats.lines_received,
        lines_parsed = stats.lines_parsed,
        parse_errors = registry.parse_errors.get(),
        field_errors = stats.field_errors,
        series_count = registry.request_count.len(),
        "Final statistics"
    );

    info!("Exporter stopped");
    outcome
}

/// Wait for Ctrl+C or, on unix, SIGTERM.
async fn shutdown_signal() -> anyhow::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                Ok("SIGINT")
            }
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        Ok("SIGINT")
    }
}

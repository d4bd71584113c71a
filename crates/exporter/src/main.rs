//! Docker exporter - resource metrics for labeled Docker containers and volumes
//!
//! This binary polls the local Docker daemon, derives metrics for every
//! container and volume registered with `prometheus.job`, and serves them
//! to Prometheus.

use anyhow::{Context, Result};
use clap::Parser;
use docker_exporter::{api, config};
use exporter_lib::{
    collector::CollectionLoopBuilder,
    docker::BollardClient,
    health::{components, HealthRegistry},
    observability::{ExporterMetrics, StructuredLogger},
    registry::MetricRegistry,
    supervisor,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinError;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const EXPORTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = config::Cli::parse();
    let config = config::ExporterConfig::load(&cli)?;

    let logger = StructuredLogger::new(&config.instance);
    logger.log_startup(
        EXPORTER_VERSION,
        config.listen_port,
        config.poll_interval_secs,
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::COLLECTOR).await;
    health_registry.register(components::DOCKER).await;

    // Register self-metrics before the first scrape
    let _metrics = ExporterMetrics::new();

    let docker = BollardClient::connect(&config.client_options())
        .context("Failed to configure docker client")?;

    supervisor::check_daemon(&docker, &health_registry)
        .await
        .context("Cannot use the docker daemon")?;

    let registry = MetricRegistry::new();
    let collection = config.collection();
    let collection_loop = CollectionLoopBuilder::new()
        .docker(Arc::new(docker))
        .registry(registry.clone())
        .interval(collection.interval)
        .target_timeout(collection.target_timeout)
        .max_concurrency(collection.max_concurrency)
        .logger(logger.clone())
        .health(health_registry.clone())
        .build()?;

    let (shutdown_tx, _) = broadcast::channel(1);

    let mut collector_handle = tokio::spawn(collection_loop.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), registry));
    let mut api_handle = tokio::spawn(api::serve(
        config.listen_addr(),
        app_state,
        shutdown_tx.subscribe(),
    ));

    // The API keeps serving health after the collector dies; the process
    // only exits on a signal or when the API itself stops.
    let mut collector_running = true;
    loop {
        tokio::select! {
            result = shutdown_signal() => {
                result?;
                break;
            }
            joined = &mut api_handle => {
                let _ = shutdown_tx.send(());
                return Err(api_exit(joined));
            }
            joined = &mut collector_handle, if collector_running => {
                collector_running = false;
                supervisor::collector_stopped(&health_registry, joined).await;
            }
        }
    }

    logger.log_shutdown("signal received");
    let _ = shutdown_tx.send(());

    if collector_running {
        if let Err(e) = collector_handle.await {
            warn!(error = %e, "Collection loop ended abnormally");
        }
    }
    match api_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "API server stopped with an error"),
        Err(e) => warn!(error = %e, "API server task ended abnormally"),
    }

    info!("Shutdown complete");
    Ok(())
}

/// Turn an API server exit before shutdown into the process error
fn api_exit(joined: Result<Result<()>, JoinError>) -> anyhow::Error {
    let err = match joined {
        Ok(Ok(())) => anyhow::anyhow!("API server stopped unexpectedly"),
        Ok(Err(e)) => e.context("API server failed"),
        Err(e) => anyhow::Error::new(e).context("API server task ended abnormally"),
    };
    error!(error = %err, "API server is gone, exiting");
    err
}

/// Wait for Ctrl-C or, on Unix, SIGTERM
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
            _ = terminate.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")
    }
}

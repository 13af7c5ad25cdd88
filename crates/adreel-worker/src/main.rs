//! Job worker binary.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use adreel_queue::JobQueue;
use adreel_router::EngineRegistry;
use adreel_worker::{metrics, JobExecutor, Poller, StuckJobDetector, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("adreel=info,adreel_worker=info,adreel_queue=info,adreel_router=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting adreel-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    metrics::init_metrics(&config.metrics_addr).context("metrics exporter")?;

    let queue = Arc::new(JobQueue::from_env().context("failed to create job queue")?);
    queue.ping().await.context("job store unreachable")?;

    let registry = Arc::new(EngineRegistry::new());
    let version = registry
        .load_catalog(&config.engines_file, config.submit_timeout)
        .with_context(|| format!("failed to load engine catalog {}", config.engines_file))?;
    info!(
        version,
        engines = registry.snapshot().len(),
        "Loaded engine catalog"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller = Poller::new(
        Arc::clone(&queue),
        Arc::clone(&registry),
        config.external_poll_interval,
        config.submit_timeout,
    );
    let poller_handle = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { poller.run(shutdown).await })
    };

    let detector = StuckJobDetector::new(Arc::clone(&queue), config.stuck_scan_interval);
    let detector_handle = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { detector.run(shutdown).await })
    };

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let executor = JobExecutor::new(config, queue, registry);
    if let Err(e) = executor.run(shutdown_rx).await {
        error!("Executor error: {}", e);
        return Err(e.into());
    }

    poller_handle.await.ok();
    detector_handle.await.ok();

    info!("Worker shutdown complete");
    Ok(())
}

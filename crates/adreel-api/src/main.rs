//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use adreel_api::{create_router, metrics, ApiConfig, AppState};
use adreel_queue::{callback_channel, CallbackIngestor, JobQueue};
use adreel_router::{EngineRegistry, Router as ExecutionRouter, RouterConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("adreel_api=info,adreel_router=info,adreel_queue=info"));

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

    info!("Starting adreel-api");

    let config = ApiConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);
    let router_config = RouterConfig::from_env();

    let registry = Arc::new(EngineRegistry::new());
    match registry.load_catalog(&router_config.engines_file, router_config.engine_timeout) {
        Ok(version) => info!(
            version,
            engines = registry.snapshot().len(),
            "Loaded engine catalog"
        ),
        Err(e) => warn!(
            file = %router_config.engines_file,
            error = %e,
            "No engine catalog loaded; /ready reports degraded"
        ),
    }

    let queue = Arc::new(JobQueue::from_env().context("failed to create job queue")?);
    let router = Arc::new(
        ExecutionRouter::new(Arc::clone(&registry), router_config).with_job_sink(queue.clone()),
    );

    let (callbacks, callback_rx) = callback_channel(config.callback_buffer);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingestor = CallbackIngestor::new(Arc::clone(&queue), callback_rx);
    let ingestor_handle = tokio::spawn(ingestor.run(shutdown_rx));

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("failed to install Prometheus recorder")?)
    } else {
        None
    };

    let state = AppState::new(config.clone(), router, queue, callbacks);
    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid bind address")?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(true);
    ingestor_handle.await.ok();

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for CTRL+C");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}

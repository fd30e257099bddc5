//! Axum API server binary.

use std::net::SocketAddr;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use talkhead_api::{create_router, metrics, ApiConfig, AppState};
use talkhead_media::check_ffmpeg;
use talkhead_ml_client::MlClientConfig;
use talkhead_pipeline::PipelineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("talkhead_api=info,talkhead_pipeline=info,talkhead_ml_client=info,talkhead_media=info,talkhead_storage=info")
    });

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

    info!("Starting talkhead-api");

    let config = ApiConfig::from_env();
    let pipeline = PipelineConfig::from_env();
    let ml = MlClientConfig::from_env();
    info!(
        host = %config.host,
        port = config.port,
        results_dir = %pipeline.results_dir.display(),
        sidecar = %ml.base_url,
        "Loaded configuration"
    );

    match check_ffmpeg(&pipeline.ffmpeg_binary) {
        Ok(path) => info!(ffmpeg = %path.display(), "Found ffmpeg"),
        Err(e) => warn!(error = %e, "ffmpeg unavailable; preprocessing videos and batch synthesis will fail"),
    }

    let state = AppState::connect(config.clone(), pipeline, &ml)
        .await
        .context("failed to connect to the model sidecar")?;

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("failed to install metrics recorder")?)
    } else {
        None
    };

    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_address()))?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

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

use anyhow::{Context, Result};
use facecheck_store::Store;
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod engine;
mod error;
mod face;
mod handlers;
mod media;
mod service;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facecheckd starting");

    let config = config::Config::load()?;
    config.ensure_dirs()?;
    tracing::info!(
        upload_dir = %config.upload_dir.display(),
        captures_dir = %config.captures_dir.display(),
        db = %config.db_path.display(),
        "storage ready"
    );

    let store = Store::open(&config.db_path)
        .await
        .with_context(|| format!("opening database {}", config.db_path.display()))?;

    // Model loading blocks; the engine thread takes over once it succeeds.
    let face = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || face::FaceCapability::from_config(&config)).await?
    };
    tracing::info!(enabled = face.is_enabled(), "face verification");

    let state = app::AppState::new(store, face, &config);
    let router = app::router(state, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(addr = %config.bind, "facecheckd ready");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("facecheckd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
    }
}

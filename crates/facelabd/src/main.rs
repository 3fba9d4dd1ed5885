use std::sync::Arc;

use anyhow::{Context, Result};
use facelab_compreface::{CompreFaceClient, CompreFaceConfig};
use facelab_core::Verifier;
use facelab_store::{DiskArtifactStore, SqliteStore};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod routes;
mod state;

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("facelabd=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(
        bind = %config.bind_addr,
        db = %config.db_path.display(),
        avatars = %config.avatar_dir.display(),
        compreface = %config.compreface_url,
        threshold = config.match_threshold,
        "facelabd starting"
    );

    let store = SqliteStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open database at {}", config.db_path.display()))?;
    let artifacts = Arc::new(DiskArtifactStore::new(config.avatar_dir.clone()));

    let mut compreface_config = CompreFaceConfig::new(config.compreface_url.clone());
    compreface_config.recognition_api_key = config.recognition_api_key.clone();
    compreface_config.verification_api_key = config.verification_api_key.clone();
    compreface_config.request_timeout = config.provider_timeout();
    if compreface_config.recognition_api_key.is_none() {
        tracing::warn!("FACELAB_RECOGNITION_API_KEY not set; enrollment and photo verification will fail");
    }
    let compreface = Arc::new(
        CompreFaceClient::new(compreface_config).context("failed to build CompreFace client")?,
    );

    let verifier = Verifier::new(compreface.clone(), Arc::new(store.clone()), artifacts)
        .with_threshold(config.match_threshold)
        .with_provider_timeout(config.provider_timeout());

    let bind_addr = config.bind_addr;
    let app = routes::router(AppState {
        verifier,
        store,
        compreface,
        config: Arc::new(config),
    });

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "facelabd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("facelabd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}

//! letter-vault HTTP server.
//!
//! Serves the JSON API the vault's pages talk to, runs the OAuth sign-in
//! round trip, and serves uploaded images from the local object store.

pub mod config;
pub mod handlers;
pub mod router;
pub mod session;
pub mod state;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::images::PublicUrls;
use crate::provider::{IdentityProvider, OAuthProvider};
use crate::storage::{db_path, SqliteBackend, StorageError};

use config::{Cli, Config, ConfigError, SESSION_PURGE_INTERVAL_SECS};
use state::{AppState, SharedState};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to open storage: {0}")]
    Storage(#[from] StorageError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Entry point: parse CLI, open storage, start server.
pub async fn run() -> Result<(), StartupError> {
    let cli = Cli::parse();
    let config = Config::from_cli_and_env(cli)?;

    crate::logging::init(&config.log_level);

    info!("letter-vault starting");
    info!(data_dir = %config.data_dir.display(), "data directory");
    info!(database = %db_path(&config.data_dir).display(), "database");
    info!(
        members = config.allowlist.members().len(),
        public_url = %config.public_url,
        "allowlist loaded"
    );
    if config.oauth.is_none() {
        warn!("no OAuth client configured; sign-in is disabled");
    }

    std::fs::create_dir_all(&config.data_dir).map_err(StorageError::from)?;
    let sqlite = Arc::new(SqliteBackend::open(
        &config.data_dir,
        PublicUrls::new(&config.public_url),
    )?);

    let purge_backend = Arc::clone(&sqlite);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SESSION_PURGE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            match purge_backend.purge_expired_sessions().await {
                Ok(0) => {}
                Ok(n) => info!(purged = n, "expired sessions removed"),
                Err(e) => warn!(error = %e, "session purge failed"),
            }
        }
    });

    let backend: Arc<dyn Backend> = sqlite;
    let provider: Arc<dyn IdentityProvider> = Arc::new(OAuthProvider::new(config.oauth.clone()));
    let state = AppState::new(
        backend,
        config.allowlist.clone(),
        provider,
        &config.public_url,
        config.max_image_bytes,
    )
    .into_shared();

    serve(state, &config.bind_addr, shutdown_signal()).await
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve(
    state: SharedState,
    addr: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), StartupError> {
    let app = router::build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    info!("letter-vault listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(StartupError::Serve)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

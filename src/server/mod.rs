//! Server module
//!
//! HTTP API and live WebSocket feed over one axum router.

pub mod connect_info;
pub mod http;
pub mod ws;

use crate::config::{Config, ConfigError, StorageBackend, StorageConfig};
use crate::polls::{FileStorage, MemoryStorage, PollRegistry, PollStorage};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to prepare data directory {path}: {source}")]
    DataDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    pub registry: PollRegistry,
    /// Cancelled when the server begins shutting down
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(registry: PollRegistry, shutdown: CancellationToken) -> Self {
        Self { registry, shutdown }
    }
}

/// Build the router for all routes
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/create", post(http::create_poll).options(http::preflight))
        .route("/api/vote", post(http::vote).options(http::preflight))
        .route("/api/get", get(http::get_poll).options(http::preflight))
        .layer(axum::middleware::map_response(http::allow_any_origin));

    Router::new()
        .merge(api)
        .route("/ws/{poll_id}", get(ws::poll_socket))
        .route("/health", get(http::health))
        .fallback(http::not_found)
        .with_state(state)
}

/// Storage backend named by the config
pub fn open_storage(config: &StorageConfig) -> Result<Arc<dyn PollStorage>, ServerError> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStorage::new())),
        StorageBackend::File => {
            let path = config.resolved_data_dir();
            std::fs::create_dir_all(&path).map_err(|source| ServerError::DataDir {
                path: path.clone(),
                source,
            })?;
            info!(path = %path.display(), "using file storage");
            Ok(Arc::new(FileStorage::new(path)))
        }
    }
}

/// Run until `shutdown` is cancelled
pub async fn serve(config: &Config, shutdown: CancellationToken) -> Result<(), ServerError> {
    let addr = config.server.socket_addr()?;
    let storage = open_storage(&config.storage)?;
    let registry = PollRegistry::new(storage, config.polls.settings());

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "pollcast listening");

    let app = build_router(AppState::new(registry.clone(), shutdown.clone()));
    let signal = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { signal.cancelled().await })
    .await?;

    registry.shutdown();
    info!("pollcast stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_file_storage_creates_dir() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("nested").join("data");
        let config = StorageConfig {
            backend: StorageBackend::File,
            data_dir: Some(data_dir.clone()),
        };
        open_storage(&config).unwrap();
        assert!(data_dir.is_dir());
    }

    #[test]
    fn test_open_memory_storage() {
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            data_dir: None,
        };
        assert!(open_storage(&config).is_ok());
    }
}

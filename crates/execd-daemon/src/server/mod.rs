//! gRPC server for the execd daemon.
//!
//! Serves the `Executor` service (plus standard gRPC health) on a Unix socket.

mod config;
pub mod executor_svc;

pub use config::ServerConfig;
pub use executor_svc::{ExecutorServiceImpl, RelaySettings};

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tonic::transport::Server;
use tracing::{info, warn};

use execd_proto::v1::executor_server::ExecutorServer;

use crate::reaper;
use crate::registry::SessionRegistry;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// gRPC server handle.
pub struct GrpcServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
}

impl GrpcServer {
    /// Create a new gRPC server with an empty session registry.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registry(config, Arc::new(SessionRegistry::new()))
    }

    /// Create a server around an existing registry.
    pub const fn with_registry(config: ServerConfig, registry: Arc<SessionRegistry>) -> Self {
        Self { config, registry }
    }

    /// Get the server configuration.
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the session registry.
    pub const fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Build the `Executor` service backed by this server's registry.
    pub fn executor_service_impl(&self) -> ExecutorServiceImpl {
        ExecutorServiceImpl::new(
            Arc::clone(&self.registry),
            RelaySettings {
                read_chunk_size: self.config.read_chunk_size,
                output_buffer: self.config.output_buffer,
            },
        )
    }

    /// Serve on the configured Unix socket until `shutdown` resolves.
    ///
    /// A stale socket file is replaced; the socket is removed again on exit.
    #[cfg(unix)]
    pub async fn serve_unix<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        use tokio::net::UnixListener;
        use tokio_stream::wrappers::UnixListenerStream;

        let path = self.config.socket_path.clone();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&path)?;
        let stream = UnixListenerStream::new(listener);

        let (health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<ExecutorServer<ExecutorServiceImpl>>()
            .await;

        let (reaper_tx, reaper_rx) = watch::channel(false);
        let reaper_handle = self.config.reaper.map(|config| {
            reaper::spawn_reaper(Arc::clone(&self.registry), config, reaper_rx)
        });

        info!(path = %path.display(), "Starting gRPC server on Unix socket");

        let result = Server::builder()
            .http2_keepalive_interval(Some(Duration::from_secs(30)))
            .http2_keepalive_timeout(Some(Duration::from_secs(10)))
            .add_service(health_service)
            .add_service(ExecutorServer::new(self.executor_service_impl()))
            .serve_with_incoming_shutdown(stream, shutdown)
            .await;

        let _ = reaper_tx.send(true);
        if let Some(handle) = reaper_handle {
            let _ = handle.await;
        }
        remove_socket(&path);

        result?;
        let sessions = self.registry.len().await;
        info!(sessions, "gRPC server stopped");
        Ok(())
    }
}

fn remove_socket(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove socket file");
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn serve_unix_runs_on_a_spawned_task() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("nested").join("execd.sock");
        let server = GrpcServer::new(ServerConfig::unix(socket.clone()));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(server.serve_unix(async {
            let _ = rx.await;
        }));
        for _ in 0..200 {
            if socket.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(socket.exists(), "socket should be bound");

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server should stop")
            .unwrap()
            .unwrap();
        assert!(!socket.exists(), "socket should be removed on shutdown");
    }
}

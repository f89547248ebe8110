//! Daemon connection over a Unix domain socket.
//!
//! tonic only dials TCP on its own, so the channel is built with a custom
//! connector that opens the socket for every (re)connect.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::{debug, info};

use crate::error::ClientError;

pub use execd_proto::v1::executor_client::ExecutorClient;

/// Placeholder authority; the connector ignores it.
const SOCKET_AUTHORITY: &str = "http://execd.sock";

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Daemon socket path.
    pub socket_path: PathBuf,
    /// Connection timeout.
    pub connect_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Self::default()
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            socket_path: execd_core::config::default_socket_path(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Connect to the daemon listening on `socket_path`.
pub async fn connect(socket_path: impl AsRef<Path>) -> Result<ExecutorClient<Channel>, ClientError> {
    connect_with(&ConnectionConfig::new(socket_path.as_ref())).await
}

/// Connect using an explicit configuration.
pub async fn connect_with(config: &ConnectionConfig) -> Result<ExecutorClient<Channel>, ClientError> {
    let endpoint = Endpoint::from_static(SOCKET_AUTHORITY)
        .connect_timeout(config.connect_timeout)
        .http2_keep_alive_interval(Duration::from_secs(30))
        .keep_alive_timeout(Duration::from_secs(10));

    let socket_path = config.socket_path.clone();
    let channel = endpoint
        .connect_with_connector(service_fn(move |_: Uri| {
            let socket_path = socket_path.clone();
            async move {
                debug!(socket = %socket_path.display(), "Dialing daemon socket");
                Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(socket_path).await?))
            }
        }))
        .await
        .map_err(|e| {
            ClientError::ConnectFailed(format!("{}: {e}", config.socket_path.display()))
        })?;

    info!(socket = %config.socket_path.display(), "Connected");
    Ok(ExecutorClient::new(channel))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert!(config.socket_path.ends_with("execd.sock"));
    }

    #[tokio::test]
    async fn missing_socket_fails_to_connect() {
        let dir = tempfile::tempdir().unwrap();
        let err = connect(dir.path().join("absent.sock")).await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectFailed(_)));
        assert!(err.to_string().contains("absent.sock"));
    }
}

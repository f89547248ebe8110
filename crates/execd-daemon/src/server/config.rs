//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use execd_core::config::DaemonConfig;

use crate::reaper::ReaperConfig;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Unix socket path.
    pub socket_path: PathBuf,

    /// Upper bound on a single output read, in bytes.
    pub read_chunk_size: usize,

    /// Channel depth between an output relay and its RPC stream.
    pub output_buffer: usize,

    /// Idle session eviction; `None` keeps sessions until `Wait`.
    pub reaper: Option<ReaperConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: execd_core::config::default_socket_path(),
            read_chunk_size: 32 * 1024,
            output_buffer: 16,
            reaper: None,
        }
    }
}

impl ServerConfig {
    /// Create a new server config listening on `path`.
    pub fn unix(path: PathBuf) -> Self {
        Self {
            socket_path: path,
            ..Default::default()
        }
    }

    /// Build from the resolved daemon configuration.
    pub fn from_daemon(config: &DaemonConfig) -> Self {
        Self {
            socket_path: config
                .socket_path
                .clone()
                .unwrap_or_else(execd_core::config::default_socket_path),
            read_chunk_size: config.read_chunk_size,
            output_buffer: config.output_buffer,
            reaper: None,
        }
        .with_idle_timeout(config.idle_session_timeout_secs.map(Duration::from_secs))
        .with_reaper_interval(Duration::from_secs(config.reaper_interval_secs))
    }

    /// Enable (or disable with `None`) the idle session reaper.
    #[must_use]
    pub fn with_idle_timeout(mut self, max_idle: Option<Duration>) -> Self {
        let interval = self
            .reaper
            .map_or(Duration::from_secs(30), |reaper| reaper.interval);
        self.reaper = max_idle.map(|max_idle| ReaperConfig { max_idle, interval });
        self
    }

    /// Set how often the reaper scans. No effect while the reaper is disabled.
    #[must_use]
    pub const fn with_reaper_interval(mut self, interval: Duration) -> Self {
        if let Some(reaper) = &mut self.reaper {
            reaper.interval = interval;
        }
        self
    }

    /// Set the output read size.
    #[must_use]
    pub const fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }
}

//! Configuration resolution for execd.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/execd/settings.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binaries)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Complete execd configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Daemon-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket the daemon listens on.
    pub socket_path: Option<PathBuf>,
    pub log_level: String,
    pub log_json: bool,
    /// Upper bound on one output read, in bytes.
    pub read_chunk_size: usize,
    /// Depth of the per-stream channel between a relay and its RPC.
    pub output_buffer: usize,
    /// Evict sessions idle for this long. `None` disables the reaper.
    pub idle_session_timeout_secs: Option<u64>,
    /// How often the reaper scans the registry.
    pub reaper_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            log_level: "info".to_string(),
            log_json: false,
            read_chunk_size: 32 * 1024, // 32 KiB
            output_buffer: 16,
            idle_session_timeout_secs: None,
            reaper_interval_secs: 30,
        }
    }
}

/// A config file as written: every key optional, so a file only overrides
/// what it actually sets.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigLayer {
    daemon: DaemonLayer,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DaemonLayer {
    socket_path: Option<PathBuf>,
    log_level: Option<String>,
    log_json: Option<bool>,
    read_chunk_size: Option<usize>,
    output_buffer: Option<usize>,
    idle_session_timeout_secs: Option<u64>,
    reaper_interval_secs: Option<u64>,
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let global = global_config_path().filter(|path| path.exists());
    resolve(global.as_deref(), explicit, |key| std::env::var(key).ok())
}

fn resolve(
    global: Option<&Path>,
    explicit: Option<&Path>,
    var: impl Fn(&str) -> Option<String>,
) -> Result<Config> {
    let mut config = Config::default();
    if let Some(path) = global {
        merge_config(&mut config, load_config_file(path)?);
    }
    // A file named on the command line must exist.
    if let Some(path) = explicit {
        merge_config(&mut config, load_config_file(path)?);
    }
    apply_env_overrides(&mut config, var);
    Ok(config)
}

/// Global config file: `<config dir>/execd/settings.json`.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("execd").join("settings.json"))
}

/// Default socket path: the user runtime dir when there is one, else the
/// temp dir.
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("execd.sock")
}

fn load_config_file(path: &Path) -> Result<ConfigLayer> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: ConfigLayer) {
    let (base, layer) = (&mut base.daemon, overlay.daemon);
    if let Some(path) = layer.socket_path {
        base.socket_path = Some(path);
    }
    if let Some(level) = layer.log_level {
        base.log_level = level;
    }
    if let Some(json) = layer.log_json {
        base.log_json = json;
    }
    if let Some(size) = layer.read_chunk_size {
        base.read_chunk_size = size;
    }
    if let Some(depth) = layer.output_buffer {
        base.output_buffer = depth;
    }
    if let Some(secs) = layer.idle_session_timeout_secs {
        base.idle_session_timeout_secs = Some(secs);
    }
    if let Some(secs) = layer.reaper_interval_secs {
        base.reaper_interval_secs = secs;
    }
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    let daemon = &mut config.daemon;

    if let Some(val) = var("EXECD_SOCKET") {
        daemon.socket_path = Some(PathBuf::from(val));
    }
    if let Some(val) = var("EXECD_LOG_LEVEL") {
        daemon.log_level = val;
    }
    if let Some(val) = var("EXECD_LOG_JSON") {
        daemon.log_json = matches!(val.as_str(), "1" | "true" | "yes");
    }
    if let Some(n) = parse_var(&var, "EXECD_READ_CHUNK_SIZE") {
        daemon.read_chunk_size = n;
    }
    if let Some(n) = parse_var(&var, "EXECD_OUTPUT_BUFFER") {
        daemon.output_buffer = n;
    }
    if let Some(n) = parse_var(&var, "EXECD_IDLE_TIMEOUT") {
        daemon.idle_session_timeout_secs = Some(n);
    }
    if let Some(n) = parse_var(&var, "EXECD_REAPER_INTERVAL") {
        daemon.reaper_interval_secs = n;
    }
}

/// A numeric variable; unparsable values are ignored.
fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|value| value.trim().parse().ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_disables_reaper() {
        let config = Config::default();
        assert!(config.daemon.idle_session_timeout_secs.is_none());
        assert_eq!(config.daemon.read_chunk_size, 32 * 1024);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"daemon": {"idle_session_timeout_secs": 600}}"#).unwrap();

        let config = resolve(None, Some(&path), |_| None).unwrap();
        assert_eq!(config.daemon.idle_session_timeout_secs, Some(600));
        assert_eq!(config.daemon.output_buffer, 16);
        assert_eq!(config.daemon.log_level, "info");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn env_overrides_win() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| match key {
            "EXECD_SOCKET" => Some("/run/execd/test.sock".into()),
            "EXECD_LOG_JSON" => Some("true".into()),
            "EXECD_READ_CHUNK_SIZE" => Some("not-a-number".into()),
            "EXECD_IDLE_TIMEOUT" => Some("45".into()),
            "EXECD_OUTPUT_BUFFER" => Some("64".into()),
            "EXECD_REAPER_INTERVAL" => Some(" 5 ".into()),
            _ => None,
        });
        assert_eq!(
            config.daemon.socket_path,
            Some(PathBuf::from("/run/execd/test.sock"))
        );
        assert!(config.daemon.log_json);
        assert_eq!(config.daemon.read_chunk_size, 32 * 1024);
        assert_eq!(config.daemon.idle_session_timeout_secs, Some(45));
        assert_eq!(config.daemon.output_buffer, 64);
        assert_eq!(config.daemon.reaper_interval_secs, 5);
    }

    #[test]
    fn merge_only_touches_keys_the_layer_sets() {
        let mut base = Config::default();
        base.daemon.socket_path = Some(PathBuf::from("/tmp/base.sock"));
        base.daemon.log_level = "debug".into();
        let overlay = ConfigLayer {
            daemon: DaemonLayer {
                read_chunk_size: Some(1024),
                ..DaemonLayer::default()
            },
        };
        merge_config(&mut base, overlay);
        assert_eq!(base.daemon.socket_path, Some(PathBuf::from("/tmp/base.sock")));
        assert_eq!(base.daemon.log_level, "debug");
        assert_eq!(base.daemon.read_chunk_size, 1024);
    }

    #[test]
    fn explicit_file_layers_over_global_file() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("global.json");
        let explicit = dir.path().join("explicit.json");
        std::fs::write(
            &global,
            r#"{"daemon": {"log_level": "debug", "read_chunk_size": 4096, "output_buffer": 8}}"#,
        )
        .unwrap();
        std::fs::write(
            &explicit,
            r#"{"daemon": {"idle_session_timeout_secs": 60, "output_buffer": 32}}"#,
        )
        .unwrap();

        let config = resolve(Some(&global), Some(&explicit), |key| {
            (key == "EXECD_LOG_LEVEL").then(|| "warn".to_string())
        })
        .unwrap();
        assert_eq!(config.daemon.log_level, "warn");
        assert_eq!(config.daemon.read_chunk_size, 4096);
        assert_eq!(config.daemon.output_buffer, 32);
        assert_eq!(config.daemon.idle_session_timeout_secs, Some(60));
        assert_eq!(config.daemon.reaper_interval_secs, 30);
        assert!(!config.daemon.log_json);
    }
}

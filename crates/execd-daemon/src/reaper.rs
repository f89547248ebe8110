//! Idle session reaper.
//!
//! A session whose `Wait` is never called would otherwise stay registered
//! (and keep its process) forever. When enabled, the reaper periodically
//! kills and removes sessions that have seen no caller activity for the
//! configured timeout and have no pending `Wait`, stdin pump or output relay.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use execd_core::SessionId;

use crate::registry::SessionRegistry;
use crate::session::SessionError;

/// Reaper settings.
#[derive(Debug, Clone, Copy)]
pub struct ReaperConfig {
    pub max_idle: Duration,
    pub interval: Duration,
}

/// Evict every idle session once. Returns the evicted ids.
pub async fn reap_idle(registry: &SessionRegistry, max_idle: Duration) -> Vec<SessionId> {
    let mut evicted = Vec::new();
    for session in registry.idle_sessions(max_idle).await {
        let id = session.id();
        match session.kill().await {
            Ok(()) => info!(session_id = %id, "Killed idle session's process"),
            Err(SessionError::NotStarted | SessionError::AlreadyExited | SessionError::StartFailed(_)) => {}
            Err(e) => warn!(session_id = %id, error = %e, "Failed to kill idle session"),
        }
        if registry.remove(id).await.is_some() {
            info!(session_id = %id, idle_secs = max_idle.as_secs(), "Evicted idle session");
            evicted.push(id);
        }
    }
    evicted
}

/// Run [`reap_idle`] every `config.interval` until `shutdown` flips to `true`.
pub fn spawn_reaper(
    registry: Arc<SessionRegistry>,
    config: ReaperConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            max_idle_secs = config.max_idle.as_secs(),
            interval_secs = config.interval.as_secs(),
            "Idle session reaper started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = reap_idle(&registry, config.max_idle).await;
                    if !evicted.is_empty() {
                        debug!(count = evicted.len(), "Reaper pass finished");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Idle session reaper stopped");
    })
}

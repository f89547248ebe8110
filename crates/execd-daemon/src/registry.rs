//! Session registry: the daemon's only cross-session shared state.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};

use execd_core::{CommandSpec, SessionId};

use crate::session::Session;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),
}

/// Concurrency-safe map from [`SessionId`] to [`Session`].
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    next_id: AtomicU32,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Register a new session for `spec`.
    pub async fn register(&self, spec: CommandSpec) -> Arc<Session> {
        let mut sessions = self.sessions.write().await;
        let id = self.allocate_id(&sessions);
        let session = Arc::new(Session::new(id, spec));
        sessions.insert(id, Arc::clone(&session));
        let active = sessions.len();
        drop(sessions);

        info!(session_id = %id, path = %session.spec().path, active, "Session registered");
        session
    }

    /// Next id from the counter, skipping 0 and ids still registered after
    /// the counter wraps.
    fn allocate_id(&self, sessions: &HashMap<SessionId, Arc<Session>>) -> SessionId {
        loop {
            let raw = self.next_id.fetch_add(1, Ordering::Relaxed);
            if raw == 0 {
                continue;
            }
            let id = SessionId::new(raw);
            if !sessions.contains_key(&id) {
                return id;
            }
        }
    }

    /// Look up a session, recording caller activity on it.
    pub async fn lookup(&self, id: SessionId) -> Result<Arc<Session>, RegistryError> {
        let session = self
            .sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))?;
        session.touch();
        Ok(session)
    }

    /// Remove a session. Removing an absent id is a no-op.
    pub async fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.write().await.remove(&id);
        if removed.is_some() {
            debug!(session_id = %id, "Session removed");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Ids of every registered session, in ascending order.
    pub async fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Sessions with no activity for at least `max_idle`.
    pub async fn idle_sessions(&self, max_idle: Duration) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|session| session.is_idle(max_idle))
            .cloned()
            .collect()
    }

    #[cfg(test)]
    fn with_next_id(next: u32) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(next),
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn spec() -> CommandSpec {
        CommandSpec::new("/bin/true")
    }

    #[tokio::test]
    async fn ids_increase_monotonically() {
        let registry = SessionRegistry::new();
        let a = registry.register(spec()).await.id();
        let b = registry.register(spec()).await.id();
        assert_eq!(a.get(), 1);
        assert!(b > a);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn lookup_unknown_id_is_not_found() {
        let registry = SessionRegistry::new();
        let err = registry.lookup(SessionId::new(99)).await.err().unwrap();
        assert_eq!(err, RegistryError::NotFound(SessionId::new(99)));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = SessionRegistry::new();
        let id = registry.register(spec()).await.id();
        assert!(registry.remove(id).await.is_some());
        assert!(registry.remove(id).await.is_none());
        assert!(registry.lookup(id).await.is_err());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn wrapped_counter_skips_zero_and_live_ids() {
        let registry = SessionRegistry::with_next_id(u32::MAX);
        let last = registry.register(spec()).await.id();
        assert_eq!(last.get(), u32::MAX);

        // Counter wraps to 0 (skipped) then 1.
        let first = registry.register(spec()).await.id();
        assert_eq!(first.get(), 1);

        registry.next_id.store(1, Ordering::Relaxed);
        let next = registry.register(spec()).await.id();
        assert_eq!(next.get(), 2, "id 1 is still registered and must be skipped");
    }

    #[tokio::test]
    async fn concurrent_registration_yields_unique_ids() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.register(spec()).await.id() })
            })
            .collect();
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 32);
        assert_eq!(registry.ids().await, ids);
    }

    #[tokio::test]
    async fn fresh_session_is_idle_only_after_timeout() {
        let registry = SessionRegistry::new();
        registry.register(spec()).await;
        assert!(registry.idle_sessions(Duration::from_secs(60)).await.is_empty());
        assert_eq!(registry.idle_sessions(Duration::ZERO).await.len(), 1);
    }
}

//! Process-wide map of connected clients.

use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::session::Session;

/// Identifier supplied by the client in the connection URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl Borrow<str> for ClientId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Active sessions keyed by client id.
///
/// Backed by a sharded concurrent map, so a mutation only locks the shard of
/// the key it touches. Guards never outlive a method call; callers get owned
/// `Arc<Session>` handles and may await on them freely.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<ClientId, Arc<Session>>,
    generations: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unique per session instance, so a stale session can tell itself apart
    /// from a newer one registered under the same id.
    pub(crate) fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Insert under the session's id, returning whatever was there before.
    /// The caller is responsible for having stopped the previous session.
    pub fn register(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        self.sessions.insert(session.id().clone(), session)
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Remove `id` only if it still maps to the session with `generation`.
    pub fn remove_session(&self, id: &str, generation: u64) -> bool {
        self.sessions
            .remove_if(id, |_, session| session.generation() == generation)
            .is_some()
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{idle_context, RecordingSink};

    #[tokio::test]
    async fn test_register_lookup_remove() {
        let ctx = idle_context();
        let session = Session::new("user-1".into(), Box::new(RecordingSink::default()), &ctx);

        assert!(ctx.registry.register(session.clone()).is_none());
        assert_eq!(ctx.registry.len(), 1);
        let found = ctx.registry.lookup("user-1").unwrap();
        assert!(Arc::ptr_eq(&found, &session));

        assert!(ctx.registry.remove("user-1").is_some());
        assert!(ctx.registry.lookup("user-1").is_none());
        // removing again is a no-op
        assert!(ctx.registry.remove("user-1").is_none());
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn test_register_replaces_existing_entry() {
        let ctx = idle_context();
        let first = Session::new("user-1".into(), Box::new(RecordingSink::default()), &ctx);
        let second = Session::new("user-1".into(), Box::new(RecordingSink::default()), &ctx);
        assert_ne!(first.generation(), second.generation());

        ctx.registry.register(first.clone());
        let displaced = ctx.registry.register(second.clone()).unwrap();
        assert!(Arc::ptr_eq(&displaced, &first));
        assert_eq!(ctx.registry.len(), 1);
        assert!(Arc::ptr_eq(&ctx.registry.lookup("user-1").unwrap(), &second));
    }

    #[tokio::test]
    async fn test_stale_generation_does_not_evict_replacement() {
        let ctx = idle_context();
        let old = Session::new("user-1".into(), Box::new(RecordingSink::default()), &ctx);
        let new = Session::new("user-1".into(), Box::new(RecordingSink::default()), &ctx);
        ctx.registry.register(new.clone());

        assert!(!ctx.registry.remove_session("user-1", old.generation()));
        assert_eq!(ctx.registry.len(), 1);
        assert!(ctx.registry.remove_session("user-1", new.generation()));
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_registration() {
        let ctx = idle_context();
        let mut handles = Vec::new();
        for i in 0..64 {
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                // 16 distinct ids, each registered 4 times
                let id = format!("user-{}", i % 16);
                let session = Session::new(id.into(), Box::new(RecordingSink::default()), &ctx);
                ctx.registry.register(session);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(ctx.registry.len(), 16);
        assert_eq!(ctx.registry.ids().first().map(ClientId::as_str), Some("user-0"));
    }
}

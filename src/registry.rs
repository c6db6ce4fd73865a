//! C6 — Streaming Registry: tracks live SSE/WebSocket sessions by opaque
//! identifier, serialized under a single lock per registry (spec.md §4.6).

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Shared contract every streaming session (SSE or WebSocket) implements so
/// the registry can track it generically.
pub trait StreamingSession: Send + Sync {
    fn identifier(&self) -> &str;
    fn is_active(&self) -> bool;
    fn close(&self);
}

/// Registration/unregistration notifications (spec.md §4.6).
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Registered(String),
    Unregistered(String),
}

/// A shared mutable map from identifier to session, plus the full list of
/// sessions regardless of identifier.
pub struct StreamingRegistry<S: StreamingSession + 'static> {
    by_id: DashMap<String, Arc<S>>,
    all: Mutex<Vec<Arc<S>>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl<S: StreamingSession + 'static> Default for StreamingRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: StreamingSession + 'static> StreamingRegistry<S> {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        StreamingRegistry {
            by_id: DashMap::new(),
            all: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// If `session`'s identifier is non-empty, atomically closes any prior
    /// session with the same identifier before indexing the new one
    /// (spec.md §4.6, §8 invariant 4, scenario 6).
    pub fn register(&self, session: Arc<S>) {
        let id = session.identifier();
        if !id.is_empty() {
            if let Some((_, previous)) = self.by_id.remove(id) {
                previous.close();
            }
            self.by_id.insert(id.to_string(), session.clone());
        }
        self.all.lock().push(session);
        let _ = self.events.send(RegistryEvent::Registered(id.to_string()));
    }

    /// Removes `session` from the list (and, if it is still the indexed
    /// holder of its identifier, from the index too), firing an
    /// unregistration event iff the session was present.
    pub fn unregister(&self, session: &Arc<S>) {
        let mut all = self.all.lock();
        let before = all.len();
        all.retain(|s| !Arc::ptr_eq(s, session));
        let was_present = all.len() != before;
        drop(all);

        let id = session.identifier();
        if !id.is_empty() {
            if let Some(entry) = self.by_id.get(id) {
                if Arc::ptr_eq(&entry, session) {
                    drop(entry);
                    self.by_id.remove(id);
                }
            }
        }

        if was_present {
            let _ = self.events.send(RegistryEvent::Unregistered(id.to_string()));
        }
    }

    pub fn by_identifier(&self, id: &str) -> Option<Arc<S>> {
        self.by_id.get(id).map(|entry| entry.clone()).filter(|s| s.is_active())
    }

    pub fn find<F: Fn(&str) -> bool>(&self, predicate: F) -> Vec<Arc<S>> {
        self.by_id
            .iter()
            .filter(|entry| entry.value().is_active() && predicate(entry.key()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<S>> {
        self.all.lock().iter().filter(|s| s.is_active()).cloned().collect()
    }

    pub fn drop_all(&self) {
        let sessions: Vec<Arc<S>> = self.all.lock().clone();
        for session in sessions {
            session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeSession {
        id: String,
        open: AtomicBool,
    }

    impl FakeSession {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(FakeSession { id: id.to_string(), open: AtomicBool::new(true) })
        }
    }

    impl StreamingSession for FakeSession {
        fn identifier(&self) -> &str {
            &self.id
        }
        fn is_active(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
        fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
        }
    }

    #[test]
    fn registering_same_identifier_closes_the_incumbent() {
        let registry: StreamingRegistry<FakeSession> = StreamingRegistry::new();
        let first = FakeSession::new("u:1");
        let second = FakeSession::new("u:1");
        registry.register(first.clone());
        registry.register(second.clone());

        assert!(!first.is_active());
        assert!(second.is_active());
        assert_eq!(registry.all().len(), 1);
        assert!(Arc::ptr_eq(&registry.by_identifier("u:1").unwrap(), &second));
    }

    #[test]
    fn empty_identifier_sessions_are_tracked_but_not_indexed() {
        let registry: StreamingRegistry<FakeSession> = StreamingRegistry::new();
        let anon = FakeSession::new("");
        registry.register(anon.clone());
        assert_eq!(registry.all().len(), 1);
        assert!(registry.by_identifier("").is_none());
    }

    #[test]
    fn unregister_removes_from_list_and_index() {
        let registry: StreamingRegistry<FakeSession> = StreamingRegistry::new();
        let session = FakeSession::new("x");
        registry.register(session.clone());
        registry.unregister(&session);
        assert!(registry.all().is_empty());
        assert!(registry.by_identifier("x").is_none());
    }

    #[test]
    fn drop_all_closes_every_session() {
        let registry: StreamingRegistry<FakeSession> = StreamingRegistry::new();
        let a = FakeSession::new("a");
        let b = FakeSession::new("b");
        registry.register(a.clone());
        registry.register(b.clone());
        registry.drop_all();
        assert!(!a.is_active());
        assert!(!b.is_active());
    }

    #[test]
    fn find_only_returns_active_sessions_matching_predicate() {
        let registry: StreamingRegistry<FakeSession> = StreamingRegistry::new();
        registry.register(FakeSession::new("room:1"));
        registry.register(FakeSession::new("room:2"));
        let matches = registry.find(|id| id.starts_with("room:"));
        assert_eq!(matches.len(), 2);
    }
}

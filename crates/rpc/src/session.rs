//! Iterator sessions.
//!
//! `invoke*` executions that leave an iterator on the stack allocate a
//! session owning the iterator contents; clients page through them with
//! `traverseiterator` until `terminatesession` or the idle TTL collects
//! the session. Expired sessions are swept on every store access.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct SessionIterator {
    items: Vec<Value>,
    cursor: usize,
}

struct Session {
    iterators: HashMap<Uuid, SessionIterator>,
    last_activity: Instant,
}

/// The process-wide iterator-session registry. Constructed per node and
/// passed to the RPC handler, never ambient.
pub struct SessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
    ttl: Duration,
    max_iterators_per_session: usize,
}

impl SessionStore {
    /// Creates a store with the given idle TTL and per-session iterator
    /// cap.
    pub fn new(ttl: Duration, max_iterators_per_session: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
            max_iterators_per_session,
        }
    }

    /// Sweeps idle sessions. Runs automatically on every access.
    pub fn collect_expired(&self) {
        let mut sessions = self.sessions.lock();
        sessions.retain(|_, session| session.last_activity.elapsed() <= self.ttl);
    }

    /// Creates a session owning the given pre-rendered iterators. Returns
    /// the session id and one id per iterator, in order. Iterators beyond
    /// the per-session cap are dropped.
    pub fn create_session(&self, iterators: Vec<Vec<Value>>) -> (Uuid, Vec<Uuid>) {
        self.collect_expired();
        let session_id = Uuid::new_v4();
        let mut ids = Vec::new();
        let mut session = Session {
            iterators: HashMap::new(),
            last_activity: Instant::now(),
        };
        for items in iterators.into_iter().take(self.max_iterators_per_session) {
            let iterator_id = Uuid::new_v4();
            session
                .iterators
                .insert(iterator_id, SessionIterator { items, cursor: 0 });
            ids.push(iterator_id);
        }
        self.sessions.lock().insert(session_id, session);
        (session_id, ids)
    }

    /// Steps an iterator up to `count` items, advancing its cursor and
    /// refreshing the session's activity stamp.
    pub fn traverse(
        &self,
        session_id: &Uuid,
        iterator_id: &Uuid,
        count: usize,
    ) -> Option<Vec<Value>> {
        self.collect_expired();
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(session_id)?;
        session.last_activity = Instant::now();
        let iterator = session.iterators.get_mut(iterator_id)?;
        let end = (iterator.cursor + count).min(iterator.items.len());
        let page = iterator.items[iterator.cursor..end].to_vec();
        iterator.cursor = end;
        Some(page)
    }

    /// Whether a session holds the iterator, distinguishing unknown
    /// sessions from unknown iterators.
    pub fn has_iterator(&self, session_id: &Uuid, iterator_id: &Uuid) -> Option<bool> {
        let sessions = self.sessions.lock();
        let session = sessions.get(session_id)?;
        Some(session.iterators.contains_key(iterator_id))
    }

    /// Drops a session with all its iterators; returns whether it existed.
    pub fn terminate(&self, session_id: &Uuid) -> bool {
        self.collect_expired();
        self.sessions.lock().remove(session_id).is_some()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> SessionStore {
        SessionStore::new(Duration::from_secs(60), 16)
    }

    #[test]
    fn test_traverse_pages_through_items() {
        let store = store();
        let items: Vec<Value> = (0..5).map(|i| json!(i)).collect();
        let (session, iterators) = store.create_session(vec![items]);
        let iterator = iterators[0];

        assert_eq!(
            store.traverse(&session, &iterator, 2).unwrap(),
            vec![json!(0), json!(1)]
        );
        assert_eq!(
            store.traverse(&session, &iterator, 2).unwrap(),
            vec![json!(2), json!(3)]
        );
        assert_eq!(
            store.traverse(&session, &iterator, 10).unwrap(),
            vec![json!(4)]
        );
        assert!(store.traverse(&session, &iterator, 10).unwrap().is_empty());
    }

    #[test]
    fn test_terminate_semantics() {
        let store = store();
        let (session, _) = store.create_session(vec![vec![json!(1)]]);
        assert!(store.terminate(&session));
        assert!(!store.terminate(&session));
        assert!(store.traverse(&session, &Uuid::new_v4(), 1).is_none());
    }

    #[test]
    fn test_idle_sessions_are_collected() {
        let store = SessionStore::new(Duration::from_millis(0), 16);
        let (session, iterators) = store.create_session(vec![vec![json!(1)]]);
        std::thread::sleep(Duration::from_millis(5));
        // Any access sweeps the expired session.
        assert!(store.traverse(&session, &iterators[0], 1).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_iterator_cap_enforced() {
        let store = SessionStore::new(Duration::from_secs(60), 2);
        let (_, iterators) =
            store.create_session(vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]]);
        assert_eq!(iterators.len(), 2);
    }

    #[test]
    fn test_unknown_iterator_in_live_session() {
        let store = store();
        let (session, _) = store.create_session(vec![vec![json!(1)]]);
        assert_eq!(store.has_iterator(&session, &Uuid::new_v4()), Some(false));
        assert!(store.traverse(&session, &Uuid::new_v4(), 1).is_none());
    }
}

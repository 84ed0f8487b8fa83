//! Per-session conversation memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Session memory capability injected into the dispatcher and LLM context.
pub trait SessionStore: Send + Sync {
    /// Accumulated memory for `session_id`, or `None` if nothing was stored yet.
    fn fetch(&self, session_id: &str) -> Option<String>;

    /// Append one entry to the session log.
    fn append(&self, session_id: &str, text: &str);
}

/// Process-local store.
///
/// The outer map lock is only held long enough to find or create a
/// session's entry; reads and appends then serialize on that session's own
/// lock, so unrelated sessions never wait on each other.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Arc<Mutex<String>>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, session_id: &str, text: &str) -> Self {
        self.append(session_id, text);
        self
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.sessions).keys().cloned().collect();
        ids.sort();
        ids
    }

    fn entry(&self, session_id: &str) -> Arc<Mutex<String>> {
        let mut sessions = lock(&self.sessions);
        Arc::clone(sessions.entry(session_id.to_string()).or_default())
    }

    fn existing(&self, session_id: &str) -> Option<Arc<Mutex<String>>> {
        lock(&self.sessions).get(session_id).cloned()
    }
}

impl SessionStore for InMemorySessionStore {
    fn fetch(&self, session_id: &str) -> Option<String> {
        let entry = self.existing(session_id)?;
        let text = lock(&entry).clone();
        Some(text)
    }

    fn append(&self, session_id: &str, text: &str) {
        let entry = self.entry(session_id);
        let mut log = lock(&entry);
        if !log.is_empty() {
            log.push('\n');
        }
        log.push_str(text);
    }
}

/// A poisoned lock still holds a consistent string; keep serving it.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fetch_unknown_session_is_none() {
        let store = InMemorySessionStore::new();
        assert_eq!(store.fetch("nope"), None);
    }

    #[test]
    fn appends_are_joined_with_newlines() {
        let store = InMemorySessionStore::new();
        store.append("s1", "first");
        store.append("s1", "second");
        store.append("s2", "other");
        assert_eq!(store.fetch("s1").as_deref(), Some("first\nsecond"));
        assert_eq!(store.fetch("s2").as_deref(), Some("other"));
        assert_eq!(store.session_ids(), vec!["s1", "s2"]);
    }

    #[test]
    fn concurrent_appends_to_one_session_are_not_lost() {
        let store = Arc::new(InMemorySessionStore::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..50 {
                        store.append("shared", &format!("t{t}-{i}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("append thread panicked");
        }

        let text = store.fetch("shared").unwrap();
        assert_eq!(text.lines().count(), 400);
        assert!(text.lines().all(|l| l.starts_with('t') && l.contains('-')));
    }
}

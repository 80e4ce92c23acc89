//! The shared set of live sessions.
//!
//! The registry is the only structure mutated from multiple tasks; every
//! access goes through one mutex with short critical sections. Broadcast
//! iteration never happens under the lock: `snapshot` copies the session
//! handles out and the dispatcher works on the copy, so an insert or remove
//! during a fan-out neither joins nor escapes that broadcast.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::session::Session;

#[derive(Debug, Default)]
pub struct Registry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    next_client: AtomicU64,
    disconnects_total: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a process-unique client id: `<prefix>-<counter>`.
    pub fn allocate_id(&self, prefix: &str) -> String {
        let n = self.next_client.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{n}")
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id().to_string(), session);
    }

    /// Remove a session and count the disconnect. Idempotent: only the call
    /// that actually removes increments the counter.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.lock().unwrap().remove(id);
        if removed.is_some() {
            self.disconnects_total.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    /// The membership at one well-defined instant, safe to iterate while
    /// other tasks insert and remove.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }

    pub fn disconnects_total(&self) -> u64 {
        self.disconnects_total.load(Ordering::Relaxed)
    }
}

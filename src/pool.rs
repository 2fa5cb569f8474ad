//! Keyed session pool
//!
//! Idle authenticated sessions are parked here keyed by
//! `host:port:user` and reused by later connects against the same
//! endpoint. Stacks are LIFO (the most recently parked session is the
//! most likely to still be alive) and bounded per key; when a stack is
//! full the caller logs the surplus session out instead.
//!
//! The pool holds only surrendered session handles, never the owning
//! [`crate::Connection`] values, and its mutex is never held across
//! I/O: liveness probing happens after checkout, on the caller's side.

use crate::session::ImapSession;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, warn};

/// Default per-key cap on parked sessions.
pub const DEFAULT_MAX_PER_KEY: usize = 10;

/// Counts reported by [`SessionPool::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max_per_key: usize,
    /// Keys with at least one parked session.
    pub active_keys: usize,
    pub total_pooled: usize,
}

/// Process-wide pool of idle IMAP sessions.
#[derive(Debug)]
pub struct SessionPool {
    max_per_key: usize,
    stacks: Mutex<HashMap<String, Vec<ImapSession>>>,
}

impl Default for SessionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionPool {
    /// A pool with the default per-key cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_PER_KEY)
    }

    /// A pool with a custom per-key cap.
    #[must_use]
    pub fn with_capacity(max_per_key: usize) -> Self {
        Self {
            max_per_key: max_per_key.max(1),
            stacks: Mutex::new(HashMap::new()),
        }
    }

    /// The opt-in process-wide instance, created on first use.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<SessionPool>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Pop the most recently parked session for `key`, if any.
    ///
    /// The returned handle was healthy when parked; the caller must
    /// verify liveness (NOOP) before adopting it.
    pub(crate) fn checkout(&self, key: &str) -> Option<ImapSession> {
        let mut stacks = self.stacks.lock().expect("pool mutex poisoned");
        let session = stacks.get_mut(key).and_then(Vec::pop);
        if session.is_some() {
            debug!("checked out pooled session for {key}");
        }
        session
    }

    /// Park a session under `key`.
    ///
    /// # Errors
    ///
    /// Returns the session back when the stack for `key` is full; the
    /// caller should log it out.
    pub(crate) fn checkin(&self, key: &str, session: ImapSession) -> Result<(), ImapSession> {
        let mut stacks = self.stacks.lock().expect("pool mutex poisoned");
        let stack = stacks.entry(key.to_string()).or_default();
        if stack.len() >= self.max_per_key {
            warn!("session pool full for {key}; surplus session must be logged out");
            return Err(session);
        }
        stack.push(session);
        debug!("returned session to pool for {key}");
        Ok(())
    }

    /// Drain every stack, logging each session out.
    pub async fn clear(&self) {
        let drained: Vec<ImapSession> = {
            let mut stacks = self.stacks.lock().expect("pool mutex poisoned");
            stacks.drain().flat_map(|(_, stack)| stack).collect()
        };
        for session in drained {
            session.logout().await.ok();
        }
    }

    /// Point-in-time pool counts.
    pub fn stats(&self) -> PoolStats {
        let stacks = self.stacks.lock().expect("pool mutex poisoned");
        PoolStats {
            max_per_key: self.max_per_key,
            active_keys: stacks.values().filter(|stack| !stack.is_empty()).count(),
            total_pooled: stacks.values().map(Vec::len).sum(),
        }
    }
}

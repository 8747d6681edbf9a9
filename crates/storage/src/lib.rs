mod tracker;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use enquiry_core::Exchange;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use tracker::ContextTracker;

pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 30 * 60;
pub const DEFAULT_HISTORY_CAP: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub history: VecDeque<Exchange>,
    pub interests: BTreeSet<String>,
    pub asked_topics: BTreeSet<String>,
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            history: VecDeque::new(),
            interests: BTreeSet::new(),
            asked_topics: BTreeSet::new(),
            message_count: 0,
            created_at: now,
            last_activity: now,
        }
    }
}

/// Lifecycle rules every store enforces on its own.
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    pub ttl: Duration,
    pub history_cap: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECONDS),
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }
}

impl StoreLimits {
    pub fn is_expired(&self, session: &SessionContext, now: DateTime<Utc>) -> bool {
        now - session.last_activity >= self.ttl
    }
}

/// Session table keyed by opaque session id. Every call sweeps expired
/// sessions first, so a stale id always reads as absent.
pub trait ContextStore: Send + Sync {
    fn get(&self, session_id: &str, now: DateTime<Utc>) -> Option<SessionContext>;

    fn get_or_create(&self, session_id: &str, now: DateTime<Utc>) -> SessionContext;

    /// Applies `mutate` to the (possibly fresh) session, then trims history to
    /// the cap and stamps `last_activity`. Returns the stored state.
    fn update(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        mutate: &mut dyn FnMut(&mut SessionContext),
    ) -> SessionContext;

    fn evict_expired(&self, now: DateTime<Utc>) -> usize;

    /// Returns whether a session was removed.
    fn reset(&self, session_id: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Default)]
pub struct MemoryContextStore {
    sessions: Arc<RwLock<HashMap<String, SessionContext>>>,
    limits: StoreLimits,
}

impl MemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: StoreLimits) -> Self {
        Self {
            sessions: Arc::default(),
            limits,
        }
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    fn sweep(&self, sessions: &mut HashMap<String, SessionContext>, now: DateTime<Utc>) -> usize {
        let before = sessions.len();
        sessions.retain(|_, session| !self.limits.is_expired(session, now));
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, "evicted idle sessions");
        }
        evicted
    }
}

impl ContextStore for MemoryContextStore {
    fn get(&self, session_id: &str, now: DateTime<Utc>) -> Option<SessionContext> {
        let mut sessions = self.sessions.write();
        self.sweep(&mut sessions, now);
        sessions.get(session_id).cloned()
    }

    fn get_or_create(&self, session_id: &str, now: DateTime<Utc>) -> SessionContext {
        let mut sessions = self.sessions.write();
        self.sweep(&mut sessions, now);
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionContext::new(session_id, now))
            .clone()
    }

    fn update(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        mutate: &mut dyn FnMut(&mut SessionContext),
    ) -> SessionContext {
        let mut sessions = self.sessions.write();
        self.sweep(&mut sessions, now);
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionContext::new(session_id, now));

        mutate(session);
        while session.history.len() > self.limits.history_cap {
            session.history.pop_front();
        }
        session.last_activity = now;
        session.clone()
    }

    fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write();
        self.sweep(&mut sessions, now)
    }

    fn reset(&self, session_id: &str) -> bool {
        self.sessions.write().remove(session_id).is_some()
    }

    fn len(&self) -> usize {
        self.sessions.read().len()
    }
}

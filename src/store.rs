use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

use crate::constants::SESSION_IDLE_TIMEOUT;
use crate::session::Session;
use crate::turns::TurnLimiter;

pub type SessionHandle = Arc<Mutex<Session>>;

#[derive(Debug)]
struct Entry {
    handle: SessionHandle,
    last_seen: Instant,
}

/// Live sessions keyed by the id in the session cookie. Sessions never share
/// state; the map lock is only held to look one up. A session nobody has
/// touched for `idle_timeout` is dropped.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Entry>>,
    limiter: TurnLimiter,
    idle_timeout: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(TurnLimiter::default())
    }
}

impl SessionStore {
    pub fn new(limiter: TurnLimiter) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            limiter,
            idle_timeout: SESSION_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Starts a new session. Expired sessions are swept first.
    pub async fn create(&self) -> (Uuid, SessionHandle) {
        let id = Uuid::new_v4();
        let handle = Arc::new(Mutex::new(Session::with_limiter(self.limiter)));
        let mut sessions = self.sessions.write().await;
        self.sweep_locked(&mut sessions);
        sessions.insert(
            id,
            Entry {
                handle: handle.clone(),
                last_seen: Instant::now(),
            },
        );
        info!(session = %id, live = sessions.len(), "session created");
        (id, handle)
    }

    /// Looks up a live session and marks it as used.
    pub async fn get(&self, id: &Uuid) -> Option<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        let expired = sessions.get(id)?.last_seen.elapsed() >= self.idle_timeout;
        if expired {
            sessions.remove(id);
            info!(session = %id, "session expired");
            return None;
        }
        let entry = sessions.get_mut(id)?;
        entry.last_seen = Instant::now();
        Some(entry.handle.clone())
    }

    /// Returns the session for `id`, creating a fresh one when the id is
    /// missing, unknown or expired. The flag tells whether a new session
    /// was made.
    pub async fn get_or_create(&self, id: Option<Uuid>) -> (Uuid, SessionHandle, bool) {
        if let Some(id) = id {
            if let Some(handle) = self.get(&id).await {
                return (id, handle, false);
            }
        }
        let (id, handle) = self.create().await;
        (id, handle, true)
    }

    pub async fn remove(&self, id: &Uuid) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            info!(session = %id, "session ended");
        }
        removed
    }

    /// Drops every session idle for longer than the timeout. Returns how
    /// many were removed.
    pub async fn sweep(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        self.sweep_locked(&mut sessions)
    }

    fn sweep_locked(&self, sessions: &mut HashMap<Uuid, Entry>) -> usize {
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_seen.elapsed() < self.idle_timeout);
        let removed = before - sessions.len();
        if removed > 0 {
            info!(removed, "expired idle sessions");
        }
        removed
    }

    pub async fn ids(&self) -> Vec<Uuid> {
        self.sessions.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

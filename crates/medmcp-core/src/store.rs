use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use medmcp_schema::{Session, SessionId, SessionSummary};
use tokio::sync::RwLock;

use crate::config::{SessionStoreConfig, MAX_IDLE_TTL_SECONDS};

/// In-memory session records, bounded by count and idle time.
///
/// Idle expiry is checked lazily on access; capacity is enforced on insert by
/// evicting the least recently accessed record. Closed sessions are kept until
/// one of the two policies removes them.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    max_sessions: usize,
    idle_ttl: Duration,
}

impl SessionStore {
    pub fn new(config: &SessionStoreConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions: config.max_sessions.max(1),
            idle_ttl: Duration::seconds(
                config.idle_ttl_seconds.clamp(1, MAX_IDLE_TTL_SECONDS),
            ),
        }
    }

    /// Stores `session` as given and returns the ids evicted to make room.
    pub async fn insert(&self, session: Session) -> Vec<SessionId> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let mut evicted = self.purge_expired_locked(&mut sessions, now);

        while sessions.len() >= self.max_sessions && !sessions.contains_key(&session.id) {
            let Some(oldest) = sessions
                .values()
                .min_by_key(|s| s.last_accessed)
                .map(|s| s.id)
            else {
                break;
            };
            sessions.remove(&oldest);
            tracing::info!(session_id = %oldest, "evicted least recently used session");
            evicted.push(oldest);
        }

        sessions.insert(session.id, session);
        evicted
    }

    /// Snapshot of a live record; refreshes its access time.
    pub async fn get(&self, id: SessionId) -> Option<Session> {
        self.update(id, |session| session.clone()).await
    }

    /// Runs `f` on the live record, then refreshes its access time.
    pub async fn update<F, R>(&self, id: SessionId, f: F) -> Option<R>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;

        if sessions.get(&id).is_some_and(|s| self.is_expired(s, now)) {
            sessions.remove(&id);
            tracing::info!(session_id = %id, "session expired after idle timeout");
            return None;
        }

        let session = sessions.get_mut(&id)?;
        session.last_accessed = now;
        Some(f(session))
    }

    /// Summaries of live records, oldest first.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let now = Utc::now();
        let sessions = self.sessions.read().await;
        let mut live: Vec<&Session> = sessions
            .values()
            .filter(|s| !self.is_expired(s, now))
            .collect();
        live.sort_by_key(|s| s.created_at);
        live.into_iter().map(Session::summary).collect()
    }

    /// Drops every idle-expired record and returns the removed ids.
    pub async fn purge_expired(&self) -> Vec<SessionId> {
        let mut sessions = self.sessions.write().await;
        self.purge_expired_locked(&mut sessions, Utc::now())
    }

    fn purge_expired_locked(
        &self,
        sessions: &mut HashMap<SessionId, Session>,
        now: DateTime<Utc>,
    ) -> Vec<SessionId> {
        let expired: Vec<SessionId> = sessions
            .values()
            .filter(|s| self.is_expired(s, now))
            .map(|s| s.id)
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "purged idle sessions");
        }
        expired
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        now - session.last_accessed >= self.idle_ttl
    }
}

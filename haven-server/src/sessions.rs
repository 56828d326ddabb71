//! In-memory registry of open intake conversations.
//!
//! Sessions are never persisted. Idle sessions are evicted whenever a new
//! one is opened. Only a session whose lock is held at that moment is kept
//! regardless of age. Completion calls are bounded by the turn timeout, so a
//! session still `awaiting_response` past the TTL is evicted like any other.

use chrono::{DateTime, Duration, Utc};
use haven_core::ConversationSession;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

pub type SharedSession = Arc<Mutex<ConversationSession>>;

pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SharedSession>>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(ttl_minutes: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: Duration::minutes(i64::try_from(ttl_minutes).unwrap_or(i64::MAX / 60_000)),
        }
    }

    /// Open a new session, evicting idle ones first.
    pub async fn create(&self) -> (Uuid, SharedSession) {
        let evicted = self.evict_idle(Utc::now()).await;
        if evicted > 0 {
            tracing::info!(evicted, "Evicted idle intake sessions");
        }

        let session = ConversationSession::new();
        let id = session.id();
        let shared = Arc::new(Mutex::new(session));
        self.sessions.write().await.insert(id, shared.clone());
        tracing::debug!(session = %id, "Intake session opened");
        (id, shared)
    }

    pub async fn get(&self, id: Uuid) -> Option<SharedSession> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: Uuid) -> Option<SharedSession> {
        self.sessions.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop sessions idle since before `now - ttl`. Sessions whose lock is
    /// held are in use and kept.
    pub async fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = now.checked_sub_signed(self.ttl) else {
            return 0;
        };
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| match session.try_lock() {
            Ok(s) => s.last_active_at() >= cutoff,
            Err(_) => true,
        });
        before - sessions.len()
    }
}

//! In-memory SessionRepository implementation.
//!
//! Sessions live only as long as the process. Lookups treat sessions idle past
//! the TTL as absent; [`evict_expired`](SessionRepository::evict_expired)
//! reclaims them.

use async_trait::async_trait;
use chrono::Utc;
use querent_core::error::Result;
use querent_core::session::{Session, SessionRepository};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Process-local session store.
#[derive(Debug, Clone)]
pub struct InMemorySessionRepository {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    ttl: Duration,
}

impl InMemorySessionRepository {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn insert(&self, session: Arc<Session>) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id().to_string(), session);
        Ok(())
    }

    async fn find_by_id(&self, session_id: &str) -> Result<Option<Arc<Session>>> {
        let sessions = self.sessions.read().await;
        let found = sessions
            .get(session_id)
            .filter(|session| !session.is_expired(self.ttl, Utc::now()))
            .cloned();
        Ok(found)
    }

    async fn remove(&self, session_id: &str) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(session_id).is_some())
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let sessions = self.sessions.read().await;
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn evict_expired(&self, ttl: Duration) -> Result<usize> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(ttl, now));
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::info!("[SessionRepository] Evicted {} expired session(s)", evicted);
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querent_core::session::Binding;
    use querent_core::table::{Table, Value};

    fn session() -> Arc<Session> {
        let table = Table::from_rows("t", vec!["a".into()], vec![vec![Value::Int(1)]]).unwrap();
        Arc::new(Session::new(Binding::tabular(table, 5)))
    }

    #[tokio::test]
    async fn test_insert_find_remove() {
        let repo = InMemorySessionRepository::new(Duration::from_secs(60));
        let session = session();
        let id = session.id().to_string();

        repo.insert(Arc::clone(&session)).await.unwrap();
        assert!(repo.find_by_id(&id).await.unwrap().is_some());
        assert_eq!(repo.list_ids().await.unwrap(), vec![id.clone()]);

        assert!(repo.remove(&id).await.unwrap());
        assert!(!repo.remove(&id).await.unwrap());
        assert!(repo.find_by_id(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_sessions_are_hidden_then_evicted() {
        let repo = InMemorySessionRepository::new(Duration::ZERO);
        let session = session();
        let id = session.id().to_string();
        repo.insert(session).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(repo.find_by_id(&id).await.unwrap().is_none());
        assert_eq!(repo.evict_expired(Duration::ZERO).await.unwrap(), 1);
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_touch_keeps_session_alive() {
        let repo = InMemorySessionRepository::new(Duration::from_secs(3600));
        let session = session();
        repo.insert(Arc::clone(&session)).await.unwrap();
        session.touch();
        assert_eq!(repo.evict_expired(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(repo.len().await, 1);
    }
}

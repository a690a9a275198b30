//! Storage seam for live sessions.

use super::model::Session;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Holds live sessions keyed by id.
///
/// Shared by every in-flight query, so implementations take `&self` and
/// synchronise internally. A session idle past the TTL counts as gone even
/// before it is evicted.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert(&self, session: Arc<Session>) -> Result<()>;

    /// `Ok(None)` for unknown and for expired ids alike.
    async fn find_by_id(&self, session_id: &str) -> Result<Option<Arc<Session>>>;

    /// `Ok(false)` when nothing was stored under `session_id`.
    async fn remove(&self, session_id: &str) -> Result<bool>;

    /// Ids in stable order, expired ones included until evicted.
    async fn list_ids(&self) -> Result<Vec<String>>;

    /// Drops sessions idle longer than `ttl`; returns the count dropped.
    async fn evict_expired(&self, ttl: Duration) -> Result<usize>;
}

//! Session service.
//!
//! Binds data sources to sessions and exposes the read side used by report
//! collaborators (history, single interactions, previews).
//!
//! # Responsibilities
//!
//! - Computing the schema and preview once per bind
//! - Opening read-only connection pools for database files
//! - Rebinding a session to a new source wholesale
//! - Evicting idle sessions in the background

use querent_core::config::{PoolConfig, QuerentConfig};
use querent_core::error::{QuerentError, Result};
use querent_core::relational::RelationalExecutor;
use querent_core::schema::SourceSchema;
use querent_core::session::{
    Binding, DatabaseHandle, Interaction, Session, SessionRepository, TablePreview,
};
use querent_core::table::Table;
use querent_infrastructure::ConnectionManager;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A source to bind to a session.
pub enum DataSource {
    /// An already parsed table.
    Table(Table),
    /// A SQLite file, opened read-only through a pooled connection manager.
    DatabaseFile(PathBuf),
    /// An executor opened elsewhere, with its schema and preview.
    Database {
        executor: Arc<dyn RelationalExecutor>,
        schema: SourceSchema,
        preview: Vec<TablePreview>,
    },
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table(table) => f.debug_tuple("Table").field(&table.name()).finish(),
            Self::DatabaseFile(path) => f.debug_tuple("DatabaseFile").field(path).finish(),
            Self::Database { executor, .. } => f
                .debug_struct("Database")
                .field("label", &executor.label())
                .finish_non_exhaustive(),
        }
    }
}

/// Use case for session lifecycle and history access.
pub struct SessionService {
    repository: Arc<dyn SessionRepository>,
    pool: PoolConfig,
    preview_rows: usize,
    ttl: Duration,
}

impl SessionService {
    pub fn new(repository: Arc<dyn SessionRepository>, config: &QuerentConfig) -> Self {
        Self {
            repository,
            pool: config.pool.clone(),
            preview_rows: config.limits.preview_rows,
            ttl: config.session.ttl(),
        }
    }

    /// Binds `source` to a fresh session and returns the session id.
    ///
    /// # Errors
    ///
    /// Propagates errors from opening or introspecting a database file.
    pub async fn create_session(&self, source: DataSource) -> Result<String> {
        let binding = self.bind(source).await?;
        let mode = binding.mode;
        let tables = binding.schema.tables.len();

        let session = Arc::new(Session::new(binding));
        let session_id = session.id().to_string();
        self.repository.insert(session).await?;

        tracing::info!(
            "[SessionService] Created session {} ({} source, {} table(s))",
            session_id,
            mode,
            tables
        );
        Ok(session_id)
    }

    /// Replaces the session's source and returns the new binding generation.
    ///
    /// Queries still running against the old source fail with
    /// `SchemaMismatch` instead of appending to history.
    pub async fn rebind(&self, session_id: &str, source: DataSource) -> Result<u64> {
        let session = self.session(session_id).await?;
        let binding = self.bind(source).await?;
        let generation = session.rebind(binding).await;
        tracing::info!(
            "[SessionService] Rebound session {} (generation {})",
            session_id,
            generation
        );
        Ok(generation)
    }

    /// Destroys a session. Returns `false` if it did not exist.
    pub async fn close_session(&self, session_id: &str) -> Result<bool> {
        let removed = self.repository.remove(session_id).await?;
        if removed {
            tracing::info!("[SessionService] Closed session {}", session_id);
        }
        Ok(removed)
    }

    /// Looks up a live session and marks it as used.
    ///
    /// # Errors
    ///
    /// Returns `QuerentError::NotFound` for unknown or expired sessions.
    pub async fn session(&self, session_id: &str) -> Result<Arc<Session>> {
        let session = self
            .repository
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| QuerentError::not_found("Session", session_id))?;
        session.touch();
        Ok(session)
    }

    /// Interactions of the session in the order they were appended.
    pub async fn get_history(&self, session_id: &str) -> Result<Vec<Interaction>> {
        Ok(self.session(session_id).await?.history().await)
    }

    pub async fn get_interaction(&self, session_id: &str, interaction_id: &str) -> Result<Interaction> {
        self.session(session_id)
            .await?
            .interaction(interaction_id)
            .await
            .ok_or_else(|| QuerentError::not_found("Interaction", interaction_id))
    }

    /// Sample rows captured when the current source was bound.
    pub async fn preview(&self, session_id: &str) -> Result<Vec<TablePreview>> {
        let snapshot = self.session(session_id).await?.snapshot().await;
        Ok(snapshot.binding.preview.clone())
    }

    /// The current binding of the session.
    pub async fn binding(&self, session_id: &str) -> Result<Arc<Binding>> {
        Ok(self.session(session_id).await?.snapshot().await.binding)
    }

    pub async fn session_ids(&self) -> Result<Vec<String>> {
        self.repository.list_ids().await
    }

    /// Removes every session idle past the TTL.
    pub async fn evict_expired(&self) -> Result<usize> {
        self.repository.evict_expired(self.ttl).await
    }

    /// Runs [`evict_expired`](Self::evict_expired) every `interval` until
    /// `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            tracing::debug!("[SessionSweeper] Started ({}s interval)", interval.as_secs());

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = service.evict_expired().await {
                            tracing::error!("[SessionSweeper] Eviction failed: {}", e);
                        }
                    }
                }
            }
            tracing::debug!("[SessionSweeper] Stopped");
        })
    }

    async fn bind(&self, source: DataSource) -> Result<Binding> {
        match source {
            DataSource::Table(table) => Ok(Binding::tabular(table, self.preview_rows)),
            DataSource::DatabaseFile(path) => {
                let manager = ConnectionManager::open(&path, &self.pool).await?;
                let schema = manager.introspect().await?;
                if schema.is_empty() {
                    manager.close().await;
                    return Err(QuerentError::data_access(format!(
                        "{} contains no tables",
                        path.display()
                    )));
                }
                let preview = manager.sample_rows(&schema, self.preview_rows).await?;
                let handle = DatabaseHandle::new(Arc::new(manager));
                Ok(Binding::relational(handle, schema, preview))
            }
            DataSource::Database {
                executor,
                schema,
                preview,
            } => Ok(Binding::relational(
                DatabaseHandle::new(executor),
                schema,
                preview,
            )),
        }
    }
}

//! Session domain model.

use crate::error::QueryError;
use crate::relational::RelationalExecutor;
use crate::schema::SourceSchema;
use crate::table::{ResultSet, Table};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use strum::Display;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Which kind of source a session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DataMode {
    Tabular,
    Relational,
}

impl DataMode {
    /// The fragment kind this mode executes.
    pub fn fragment_kind(&self) -> FragmentKind {
        match self {
            Self::Tabular => FragmentKind::Code,
            Self::Relational => FragmentKind::Sql,
        }
    }
}

/// Kind of a generated fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FragmentKind {
    /// A frame expression over the bound table.
    Code,
    Sql,
}

/// An opened database: the executor that runs statements against it.
#[derive(Clone)]
pub struct DatabaseHandle {
    pub label: String,
    pub executor: Arc<dyn RelationalExecutor>,
}

impl DatabaseHandle {
    pub fn new(executor: Arc<dyn RelationalExecutor>) -> Self {
        Self {
            label: executor.label().to_string(),
            executor,
        }
    }
}

impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// The data a session is attached to.
#[derive(Debug, Clone)]
pub enum BoundSource {
    Tabular(Arc<Table>),
    Relational(DatabaseHandle),
}

impl BoundSource {
    pub fn mode(&self) -> DataMode {
        match self {
            Self::Tabular(_) => DataMode::Tabular,
            Self::Relational(_) => DataMode::Relational,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Tabular(table) => table.name(),
            Self::Relational(handle) => &handle.label,
        }
    }
}

/// Sample rows captured for one table at bind time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePreview {
    pub table: String,
    pub rows: ResultSet,
}

/// A bound source together with everything derived from it at bind time.
#[derive(Debug, Clone)]
pub struct Binding {
    pub mode: DataMode,
    pub source: BoundSource,
    pub schema: Arc<SourceSchema>,
    pub preview: Vec<TablePreview>,
    pub bound_at: DateTime<Utc>,
}

impl Binding {
    /// Binds an in-memory table; schema and preview come from the table itself.
    pub fn tabular(table: Table, preview_rows: usize) -> Self {
        let schema = Arc::new(table.schema());
        let preview = vec![TablePreview {
            table: table.name().to_string(),
            rows: table.preview(preview_rows),
        }];
        Self {
            mode: DataMode::Tabular,
            source: BoundSource::Tabular(Arc::new(table)),
            schema,
            preview,
            bound_at: Utc::now(),
        }
    }

    /// Binds a database whose schema and preview were introspected by the caller.
    pub fn relational(
        handle: DatabaseHandle,
        schema: SourceSchema,
        preview: Vec<TablePreview>,
    ) -> Self {
        Self {
            mode: DataMode::Relational,
            source: BoundSource::Relational(handle),
            schema: Arc::new(schema),
            preview,
            bound_at: Utc::now(),
        }
    }
}

/// One answered question. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub question: String,
    /// The validated (canonical) fragment that actually ran.
    pub generated_fragment: String,
    pub fragment_kind: FragmentKind,
    pub answer: String,
    pub created_at: DateTime<Utc>,
    pub row_count: usize,
    pub truncated: bool,
    pub elapsed_ms: u64,
}

impl Interaction {
    pub fn new(
        question: impl Into<String>,
        generated_fragment: impl Into<String>,
        fragment_kind: FragmentKind,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            question: question.into(),
            generated_fragment: generated_fragment.into(),
            fragment_kind,
            answer: answer.into(),
            created_at: Utc::now(),
            row_count: 0,
            truncated: false,
            elapsed_ms: 0,
        }
    }
}

/// The binding a query ran against, with the generation it was read at.
#[derive(Debug, Clone)]
pub struct BindingSnapshot {
    pub binding: Arc<Binding>,
    pub generation: u64,
}

#[derive(Debug)]
struct SessionState {
    binding: Arc<Binding>,
    generation: u64,
    history: Vec<Interaction>,
}

/// A session: one bound source plus its interaction history.
///
/// All mutation goes through the per-session mutex, so concurrent questions
/// on the same session never interleave their history writes.
#[derive(Debug)]
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    /// Unix milliseconds of the last lookup.
    last_accessed: AtomicI64,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(binding: Binding) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            last_accessed: AtomicI64::new(now.timestamp_millis()),
            state: Mutex::new(SessionState {
                binding: Arc::new(binding),
                generation: 0,
                history: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Marks the session as used now.
    pub fn touch(&self) {
        self.last_accessed
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Time since the last [`touch`](Self::touch), measured at `now`.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        let idle_ms = now.timestamp_millis() - self.last_accessed.load(Ordering::Relaxed);
        Duration::from_millis(idle_ms.max(0) as u64)
    }

    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.idle_for(now) > ttl
    }

    pub async fn snapshot(&self) -> BindingSnapshot {
        let state = self.state.lock().await;
        BindingSnapshot {
            binding: Arc::clone(&state.binding),
            generation: state.generation,
        }
    }

    pub async fn mode(&self) -> DataMode {
        self.state.lock().await.binding.mode
    }

    /// Replaces the bound source wholesale and returns the new generation.
    ///
    /// History is kept; queries still in flight against the old binding will
    /// fail to append.
    pub async fn rebind(&self, binding: Binding) -> u64 {
        let mut state = self.state.lock().await;
        state.binding = Arc::new(binding);
        state.generation += 1;
        state.generation
    }

    /// Appends an interaction executed against `expected_generation`.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::SchemaMismatch` without appending if the session
    /// was rebound while the query ran.
    pub async fn append(
        &self,
        interaction: Interaction,
        expected_generation: u64,
    ) -> Result<(), QueryError> {
        let mut state = self.state.lock().await;
        if state.generation != expected_generation {
            return Err(QueryError::schema_mismatch(
                "the session was bound to a different source while the query ran",
            ));
        }
        state.history.push(interaction);
        Ok(())
    }

    pub async fn history(&self) -> Vec<Interaction> {
        self.state.lock().await.history.clone()
    }

    pub async fn history_len(&self) -> usize {
        self.state.lock().await.history.len()
    }

    pub async fn interaction(&self, interaction_id: &str) -> Option<Interaction> {
        self.state
            .lock()
            .await
            .history
            .iter()
            .find(|interaction| interaction.id == interaction_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Value;

    fn table() -> Table {
        Table::from_rows(
            "people",
            vec!["name".into(), "age".into()],
            vec![
                vec![Value::Text("Ann".into()), Value::Int(31)],
                vec![Value::Text("Bo".into()), Value::Int(42)],
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_append_checks_generation() {
        let session = Session::new(Binding::tabular(table(), 5));
        let snapshot = session.snapshot().await;

        let generation = session.rebind(Binding::tabular(table(), 5)).await;
        assert_eq!(generation, 1);

        let stale = Interaction::new("q", "len(df)", FragmentKind::Code, "2");
        let err = session
            .append(stale, snapshot.generation)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "schema_mismatch");
        assert_eq!(session.history_len().await, 0);

        let fresh = Interaction::new("q", "len(df)", FragmentKind::Code, "2");
        let id = fresh.id.clone();
        session.append(fresh, generation).await.unwrap();
        assert_eq!(session.interaction(&id).await.unwrap().answer, "2");
    }

    #[test]
    fn test_tabular_binding_captures_preview() {
        let binding = Binding::tabular(table(), 1);
        assert_eq!(binding.mode, DataMode::Tabular);
        assert_eq!(binding.preview[0].rows.row_count(), 1);
        assert!(binding.preview[0].rows.truncated);
        assert!(binding.schema.has_column_anywhere("age"));
    }

    #[test]
    fn test_expiry_uses_last_access() {
        let session = Session::new(Binding::tabular(table(), 5));
        let later = Utc::now() + chrono::Duration::seconds(120);
        assert!(session.is_expired(Duration::from_secs(60), later));
        assert!(!session.is_expired(Duration::from_secs(600), later));
    }
}

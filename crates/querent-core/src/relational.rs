//! Relational execution seam.
//!
//! The planner only ever talks to a database through [`RelationalExecutor`].
//! The pooled SQLite implementation lives in `querent-infrastructure`.

use crate::table::ResultSet;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Bounds applied to a single statement execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Rows kept in the result; one extra row is read to detect truncation.
    pub max_rows: usize,
    /// Wall-clock budget for the statement itself. Waiting for a pooled
    /// connection is bounded separately by the pool's acquire timeout.
    pub timeout: Duration,
}

impl ExecutionLimits {
    pub fn new(max_rows: usize, timeout: Duration) -> Self {
        Self { max_rows, timeout }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelationalError {
    #[error("Timed out after {}s waiting for a pooled connection", .waited.as_secs())]
    ConnectionTimeout { waited: Duration },

    #[error("Statement exceeded its {}s budget", .budget.as_secs())]
    ExecutionTimeout { budget: Duration },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection pool is closed")]
    Closed,
}

impl RelationalError {
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }
}

/// A read-only statement runner bound to one database.
#[async_trait]
pub trait RelationalExecutor: Send + Sync {
    /// Human-readable name of the bound database (usually the file name).
    fn label(&self) -> &str;

    /// Runs one already-validated `SELECT` statement.
    ///
    /// Implementations must release every resource they hold when the
    /// returned future is dropped.
    ///
    /// # Errors
    ///
    /// - `ConnectionTimeout`: no connection became available in time
    /// - `ExecutionTimeout`: the statement ran past `limits.timeout`
    /// - `Database`: the engine refused or failed the statement
    async fn execute_select(
        &self,
        sql: &str,
        limits: &ExecutionLimits,
    ) -> Result<ResultSet, RelationalError>;
}

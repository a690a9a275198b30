//! Sandboxed execution of accepted fragments.
//!
//! The sandbox never sees a fragment the validator has not accepted, but it
//! still enforces its own limits: a wall-clock budget, a result-row cap, and
//! the caller's cancellation token.
//!
//! - Tabular sources: the frame program is evaluated on the blocking pool.
//!   The evaluator polls the budget and a token that is cancelled when the
//!   caller cancels or drops the returned future.
//! - Relational sources: the statement goes through the session's
//!   [`RelationalExecutor`](querent_core::relational::RelationalExecutor).
//!   Dropping its future on cancellation interrupts the statement and hands
//!   the connection back to the pool.

use querent_core::agent::Fragment;
use querent_core::config::LimitsConfig;
use querent_core::frame::{Budget, EvalError, evaluate, parse_program};
use querent_core::relational::{ExecutionLimits, RelationalError};
use querent_core::session::{BoundSource, DataMode, DatabaseHandle, FragmentKind};
use querent_core::table::{ResultSet, Table};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("A {fragment} fragment cannot run against a {mode} source")]
    KindMismatch { fragment: FragmentKind, mode: DataMode },

    #[error("Fragment is not a valid frame expression: {0}")]
    Syntax(String),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Execution exceeded its {}s budget", .0.as_secs())]
    Timeout(Duration),

    #[error("Timed out after {}s waiting for a database connection", .0.as_secs())]
    ConnectionTimeout(Duration),

    #[error("Execution was cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(String),

    /// The blocking worker panicked or was shut down.
    #[error("Execution worker failed: {0}")]
    Worker(String),
}

impl From<EvalError> for ExecutionError {
    fn from(err: EvalError) -> Self {
        match err {
            EvalError::Timeout(budget) => Self::Timeout(budget),
            EvalError::Cancelled => Self::Cancelled,
            other => Self::Evaluation(other.to_string()),
        }
    }
}

impl From<RelationalError> for ExecutionError {
    fn from(err: RelationalError) -> Self {
        match err {
            RelationalError::ConnectionTimeout { waited } => Self::ConnectionTimeout(waited),
            RelationalError::ExecutionTimeout { budget } => Self::Timeout(budget),
            RelationalError::Database(message) => Self::Database(message),
            RelationalError::Closed => Self::Database(err.to_string()),
        }
    }
}

/// Limits applied to every execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    pub max_rows: usize,
    pub timeout: Duration,
}

impl From<&LimitsConfig> for SandboxLimits {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            max_rows: limits.max_result_rows,
            timeout: limits.query_timeout(),
        }
    }
}

/// Runs accepted fragments against a bound source.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    limits: SandboxLimits,
}

impl SandboxExecutor {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> SandboxLimits {
        self.limits
    }

    /// Executes `fragment` against `source`.
    ///
    /// The result holds at most `max_rows` rows; `truncated` is set when more
    /// were produced.
    ///
    /// # Errors
    ///
    /// - `KindMismatch` if the fragment kind does not fit the source
    /// - `Timeout` / `ConnectionTimeout` when a budget runs out
    /// - `Cancelled` when `cancel` fires first
    /// - `Syntax` / `Evaluation` / `Database` / `Worker` for failures below
    pub async fn execute(
        &self,
        source: &BoundSource,
        fragment: &Fragment,
        cancel: &CancellationToken,
    ) -> Result<ResultSet, ExecutionError> {
        let expected = source.mode().fragment_kind();
        if fragment.kind != expected {
            return Err(ExecutionError::KindMismatch {
                fragment: fragment.kind,
                mode: source.mode(),
            });
        }

        let started = Instant::now();
        let result = match source {
            BoundSource::Tabular(table) => self.run_frame(table, &fragment.text, cancel).await,
            BoundSource::Relational(handle) => self.run_sql(handle, &fragment.text, cancel).await,
        };

        match &result {
            Ok(rows) => tracing::debug!(
                "[Sandbox] {} fragment returned {} row(s) in {}ms (truncated={})",
                fragment.kind,
                rows.row_count(),
                started.elapsed().as_millis(),
                rows.truncated
            ),
            Err(err) => tracing::debug!(
                "[Sandbox] {} fragment failed after {}ms: {}",
                fragment.kind,
                started.elapsed().as_millis(),
                err
            ),
        }
        result
    }

    async fn run_frame(
        &self,
        table: &Arc<Table>,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<ResultSet, ExecutionError> {
        let program = parse_program(text).map_err(|err| ExecutionError::Syntax(err.to_string()))?;

        // Cancelled when the caller cancels or when this future is dropped.
        let worker_cancel = cancel.child_token();
        let _stop_on_drop = worker_cancel.clone().drop_guard();

        let table = Arc::clone(table);
        let mut budget = Budget::new(self.limits.timeout, worker_cancel);
        let evaluated = tokio::task::spawn_blocking(move || evaluate(&program, &table, &mut budget))
            .await
            .map_err(|err| ExecutionError::Worker(err.to_string()))??;

        Ok(evaluated.cap_rows(self.limits.max_rows))
    }

    async fn run_sql(
        &self,
        handle: &DatabaseHandle,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<ResultSet, ExecutionError> {
        let limits = ExecutionLimits::new(self.limits.max_rows, self.limits.timeout);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExecutionError::Cancelled),
            result = handle.executor.execute_select(text, &limits) => {
                Ok(result?.cap_rows(self.limits.max_rows))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querent_core::table::Value;

    fn people() -> Arc<Table> {
        let rows = (1..=8)
            .map(|i| vec![Value::Text(format!("p{i}")), Value::Int(20 + i)])
            .collect();
        Arc::new(Table::from_rows("people", vec!["name".into(), "age".into()], rows).unwrap())
    }

    fn sandbox(max_rows: usize) -> SandboxExecutor {
        SandboxExecutor::new(SandboxLimits {
            max_rows,
            timeout: Duration::from_secs(5),
        })
    }

    #[tokio::test]
    async fn test_frame_count() {
        let source = BoundSource::Tabular(people());
        let result = sandbox(100)
            .execute(&source, &Fragment::code("len(df)"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.rows, vec![vec![Value::Int(8)]]);
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn test_frame_rows_are_capped() {
        let source = BoundSource::Tabular(people());
        let result = sandbox(3)
            .execute(&source, &Fragment::code("df"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.row_count(), 3);
        assert!(result.truncated);
        assert_eq!(result.rows[0][0], Value::Text("p1".into()));
    }

    #[tokio::test]
    async fn test_kind_mismatch() {
        let source = BoundSource::Tabular(people());
        let err = sandbox(10)
            .execute(&source, &Fragment::sql("SELECT 1"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::KindMismatch { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_frame() {
        let source = BoundSource::Tabular(people());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = sandbox(10)
            .execute(&source, &Fragment::code("len(df)"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::Cancelled);
    }

    #[tokio::test]
    async fn test_zero_budget_times_out() {
        let source = BoundSource::Tabular(people());
        let sandbox = SandboxExecutor::new(SandboxLimits {
            max_rows: 10,
            timeout: Duration::ZERO,
        });
        let err = sandbox
            .execute(&source, &Fragment::code("len(df)"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::Timeout(Duration::ZERO));
    }

    #[test]
    fn test_relational_errors_map() {
        let waited = Duration::from_secs(2);
        assert_eq!(
            ExecutionError::from(RelationalError::ConnectionTimeout { waited }),
            ExecutionError::ConnectionTimeout(waited)
        );
        assert!(matches!(
            ExecutionError::from(RelationalError::Closed),
            ExecutionError::Database(_)
        ));
    }
}

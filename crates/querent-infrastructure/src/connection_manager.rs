//! Pooled, read-only access to a SQLite database.
//!
//! Every physical connection is opened read-only and additionally pinned with
//! `PRAGMA query_only`, so even a statement that slipped past validation
//! cannot write. Connections are recycled after `pool.max_age_secs` and checked
//! before being handed out.

use async_trait::async_trait;
use futures::TryStreamExt;
use querent_core::config::PoolConfig;
use querent_core::error::{QuerentError, Result};
use querent_core::relational::{ExecutionLimits, RelationalError, RelationalExecutor};
use querent_core::schema::{ColumnSchema, ColumnType, SourceSchema, TableSchema};
use querent_core::session::TablePreview;
use querent_core::table::{ResultSet, Value};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row, Sqlite, Statement, TypeInfo, ValueRef};
use std::ops::{Deref, DerefMut};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Accepted database file extensions.
const DATABASE_EXTENSIONS: &[&str] = &["db", "sqlite", "sqlite3"];

/// VM instructions between deadline checks.
const PROGRESS_INTERVAL: i32 = 1_000;

/// A pooled connection that returns to the pool when dropped.
pub struct ScopedConnection {
    inner: PoolConnection<Sqlite>,
    acquired_at: Instant,
}

impl ScopedConnection {
    /// How long this connection has been held.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Deref for ScopedConnection {
    type Target = SqliteConnection;

    fn deref(&self) -> &SqliteConnection {
        &self.inner
    }
}

impl DerefMut for ScopedConnection {
    fn deref_mut(&mut self) -> &mut SqliteConnection {
        &mut self.inner
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        tracing::trace!(
            "[ConnectionManager] Connection released after {}ms",
            self.acquired_at.elapsed().as_millis()
        );
    }
}

/// Flips its flag when dropped so a running statement's progress handler
/// interrupts it.
struct InterruptOnDrop(Arc<AtomicBool>);

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Owns the connection pool for one bound database.
#[derive(Clone, Debug)]
pub struct ConnectionManager {
    pool: SqlitePool,
    path: PathBuf,
    label: String,
    acquire_timeout: Duration,
}

impl ConnectionManager {
    /// Opens a read-only pool over the database at `path`.
    ///
    /// # Errors
    ///
    /// - `QuerentError::Security`: path contains `..` or has an unexpected extension
    /// - `QuerentError::NotFound`: no regular file at `path`
    /// - `QuerentError::DataAccess`: SQLite refused to open the file
    pub async fn open(path: impl AsRef<Path>, pool: &PoolConfig) -> Result<Self> {
        let path = validate_database_path(path.as_ref())?;
        let label = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .read_only(true)
            .create_if_missing(false);

        let sqlite_pool = SqlitePoolOptions::new()
            .max_connections(pool.max_connections)
            .min_connections(0)
            .max_lifetime(pool.max_age())
            .acquire_timeout(pool.acquire_timeout())
            .test_before_acquire(true)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA query_only = ON").execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await
            .map_err(|e| QuerentError::data_access(format!("cannot open {label}: {e}")))?;

        tracing::info!(
            "[ConnectionManager] Opened {} (max_connections={}, max_age={}s)",
            path.display(),
            pool.max_connections,
            pool.max_age_secs
        );

        Ok(Self {
            pool: sqlite_pool,
            path,
            label,
            acquire_timeout: pool.acquire_timeout(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Physical connections currently open (idle or in use).
    pub fn size(&self) -> u32 {
        self.pool.size()
    }

    pub fn idle(&self) -> usize {
        self.pool.num_idle()
    }

    /// Waits for a pooled connection, up to the configured acquire timeout.
    pub async fn acquire(&self) -> std::result::Result<ScopedConnection, RelationalError> {
        match self.pool.acquire().await {
            Ok(inner) => Ok(ScopedConnection {
                inner,
                acquired_at: Instant::now(),
            }),
            Err(sqlx::Error::PoolTimedOut) => {
                tracing::warn!(
                    "[ConnectionManager] No connection for {} within {}s",
                    self.label,
                    self.acquire_timeout.as_secs()
                );
                Err(RelationalError::ConnectionTimeout {
                    waited: self.acquire_timeout,
                })
            }
            Err(sqlx::Error::PoolClosed) => Err(RelationalError::Closed),
            Err(e) => Err(RelationalError::database(e.to_string())),
        }
    }

    /// Returns a connection to the pool.
    pub fn release(&self, connection: ScopedConnection) {
        drop(connection);
    }

    /// Reads the user tables and views with their declared column types.
    pub async fn introspect(&self) -> Result<SourceSchema> {
        let mut conn = self.acquire().await.map_err(to_data_access)?;
        install_deadline(&mut conn, None, Arc::new(AtomicBool::new(false))).await?;

        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master \
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| QuerentError::data_access(e.to_string()))?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let rows = sqlx::query("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")
                .bind(&name)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| QuerentError::data_access(e.to_string()))?;

            let mut columns = Vec::with_capacity(rows.len());
            for row in rows {
                let column: String = row
                    .try_get("name")
                    .map_err(|e| QuerentError::data_access(e.to_string()))?;
                let declared: String = row.try_get("type").unwrap_or_default();
                columns.push(ColumnSchema::new(column, ColumnType::from_declared(&declared)));
            }
            tables.push(TableSchema::new(name, columns));
        }

        tracing::debug!(
            "[ConnectionManager] Introspected {} table(s) in {}",
            tables.len(),
            self.label
        );
        Ok(SourceSchema::new(tables))
    }

    /// Captures the first `limit` rows of every table in `schema`.
    pub async fn sample_rows(&self, schema: &SourceSchema, limit: usize) -> Result<Vec<TablePreview>> {
        let mut previews = Vec::with_capacity(schema.tables.len());
        let mut conn = self.acquire().await.map_err(to_data_access)?;
        install_deadline(&mut conn, None, Arc::new(AtomicBool::new(false))).await?;

        for table in &schema.tables {
            let sql = format!(
                "SELECT * FROM {} LIMIT {}",
                quote_identifier(&table.name),
                limit
            );
            let rows = read_rows(&mut conn, &sql, limit)
                .await
                .map_err(|e| QuerentError::data_access(e.to_string()))?;
            previews.push(TablePreview {
                table: table.name.clone(),
                rows,
            });
        }
        Ok(previews)
    }

    /// Closes the pool; in-use connections close when they are released.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("[ConnectionManager] Closed pool for {}", self.label);
    }
}

#[async_trait]
impl RelationalExecutor for ConnectionManager {
    fn label(&self) -> &str {
        &self.label
    }

    async fn execute_select(
        &self,
        sql: &str,
        limits: &ExecutionLimits,
    ) -> std::result::Result<ResultSet, RelationalError> {
        let mut conn = self.acquire().await?;

        let deadline = Instant::now() + limits.timeout;
        let interrupted = Arc::new(AtomicBool::new(false));
        install_deadline(&mut conn, Some(deadline), Arc::clone(&interrupted))
            .await
            .map_err(|e| RelationalError::database(e.to_string()))?;
        // Dropping this future (caller cancelled) interrupts the statement.
        let _guard = InterruptOnDrop(interrupted);

        let outcome = tokio::time::timeout(limits.timeout, read_rows(&mut conn, sql, limits.max_rows)).await;
        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) if Instant::now() >= deadline => Err(RelationalError::ExecutionTimeout {
                budget: limits.timeout,
            }),
            Ok(Err(e)) => Err(RelationalError::database(e.to_string())),
            Err(_) => Err(RelationalError::ExecutionTimeout {
                budget: limits.timeout,
            }),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Checks a candidate database path before anything opens it.
pub fn validate_database_path(path: &Path) -> Result<PathBuf> {
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(QuerentError::security("database path must not contain '..'"));
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension {
        Some(ext) if DATABASE_EXTENSIONS.contains(&ext.as_str()) => {}
        _ => {
            return Err(QuerentError::security(format!(
                "database file must end in one of: .{}",
                DATABASE_EXTENSIONS.join(", .")
            )));
        }
    }

    if !path.is_file() {
        return Err(QuerentError::not_found("database", path.display().to_string()));
    }

    Ok(path.canonicalize()?)
}

/// Installs a progress handler that aborts the running statement once
/// `deadline` passes or `interrupted` is set.
///
/// Every statement path installs a fresh handler first, replacing whatever a
/// previous (possibly cancelled) holder left on the connection.
async fn install_deadline(
    conn: &mut SqliteConnection,
    deadline: Option<Instant>,
    interrupted: Arc<AtomicBool>,
) -> Result<()> {
    let mut handle = conn
        .lock_handle()
        .await
        .map_err(|e| QuerentError::data_access(e.to_string()))?;
    handle.set_progress_handler(PROGRESS_INTERVAL, move || {
        let expired = deadline.is_some_and(|deadline| Instant::now() >= deadline);
        !expired && !interrupted.load(Ordering::Relaxed)
    });
    Ok(())
}

/// Streams at most `max_rows` rows, reading one more to detect truncation.
async fn read_rows(
    conn: &mut SqliteConnection,
    sql: &str,
    max_rows: usize,
) -> std::result::Result<ResultSet, sqlx::Error> {
    let mut columns: Option<Vec<String>> = None;
    let mut rows = Vec::new();
    let mut truncated = false;

    {
        let mut stream = sqlx::query(sql).fetch(&mut *conn);
        while let Some(row) = stream.try_next().await? {
            if columns.is_none() {
                columns = Some(row.columns().iter().map(|c| c.name().to_string()).collect());
            }
            if rows.len() == max_rows {
                truncated = true;
                break;
            }
            rows.push(decode_row(&row)?);
        }
    }

    let columns = match columns {
        Some(columns) => columns,
        // No rows: the prepared statement still knows its columns.
        None => conn
            .prepare(sql)
            .await?
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
    };

    let mut result = ResultSet::new(columns, rows);
    result.truncated = truncated;
    Ok(result)
}

fn decode_row(row: &SqliteRow) -> std::result::Result<Vec<Value>, sqlx::Error> {
    (0..row.len()).map(|index| decode_value(row, index)).collect()
}

fn decode_value(row: &SqliteRow, index: usize) -> std::result::Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    // Storage class of this value, not the declared column type.
    let storage = raw.type_info().name().to_ascii_uppercase();
    let value = match storage.as_str() {
        "INTEGER" => Value::Int(row.try_get_unchecked::<i64, _>(index)?),
        "REAL" => Value::Float(row.try_get_unchecked::<f64, _>(index)?),
        "BLOB" => {
            let bytes: Vec<u8> = row.try_get_unchecked(index)?;
            Value::Text(format!("<{} bytes>", bytes.len()))
        }
        _ => Value::Text(row.try_get_unchecked::<String, _>(index)?),
    };
    Ok(value)
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_data_access(err: RelationalError) -> QuerentError {
    QuerentError::data_access(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_path_rules() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("shop.sqlite");
        std::fs::write(&good, b"").unwrap();
        assert!(validate_database_path(&good).is_ok());

        let wrong_ext = dir.path().join("shop.csv");
        std::fs::write(&wrong_ext, b"").unwrap();
        assert!(validate_database_path(&wrong_ext).unwrap_err().is_security());

        let traversal = dir.path().join("..").join("shop.db");
        assert!(validate_database_path(&traversal).unwrap_err().is_security());

        let missing = dir.path().join("missing.db");
        assert!(validate_database_path(&missing).unwrap_err().is_not_found());
    }

    #[test]
    fn test_quote_identifier_escapes_quotes() {
        assert_eq!(quote_identifier("order items"), "\"order items\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}

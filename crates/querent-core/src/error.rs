//! Error types for the Querent workspace.
//!
//! Two families live here:
//!
//! - [`QuerentError`]: failures outside the query path (configuration,
//!   storage, binding a source, session bookkeeping).
//! - [`QueryError`]: the taxonomy surfaced by the query planner. Every error
//!   raised below the planner is converted into one of these variants before it
//!   reaches a collaborator.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failures outside the query path.
///
/// Variants carry text only, so the error stays `Clone` and can be logged or
/// serialized without holding on to sqlx or io handles.
#[derive(Error, Debug, Clone, Serialize)]
pub enum QuerentError {
    #[error("{what} '{id}' does not exist")]
    NotFound { what: &'static str, id: String },

    #[error("file system: {0}")]
    Io(String),

    /// A config or secret file could not be parsed or rendered.
    #[error("malformed {format}: {message}")]
    Format {
        format: &'static str,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Opening, introspecting or sampling a bound source failed.
    #[error("data source: {0}")]
    DataAccess(String),

    /// A path or source was refused before it was opened.
    #[error("refused: {0}")]
    Security(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl QuerentError {
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { what, id: id.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn data_access(message: impl Into<String>) -> Self {
        Self::DataAccess(message.into())
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::Security(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Format { .. })
    }

    pub fn is_security(&self) -> bool {
        matches!(self, Self::Security(_))
    }

    fn format(format: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Format {
            format,
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for QuerentError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(format!("{err} ({:?})", err.kind()))
    }
}

impl From<serde_json::Error> for QuerentError {
    fn from(err: serde_json::Error) -> Self {
        Self::format("JSON", err)
    }
}

impl From<toml::de::Error> for QuerentError {
    fn from(err: toml::de::Error) -> Self {
        Self::format("TOML", err)
    }
}

impl From<toml::ser::Error> for QuerentError {
    fn from(err: toml::ser::Error) -> Self {
        Self::format("TOML", err)
    }
}

/// A type alias for `Result<T, QuerentError>`.
pub type Result<T> = std::result::Result<T, QuerentError>;

// ============================================================================
// Query taxonomy
// ============================================================================

/// Errors returned by the query planner.
///
/// Messages are safe to show to the person who asked the question: they never
/// contain raw fragments, schema internals beyond the validator's sanitised
/// reason, or provider error bodies.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryError {
    /// The question or the generated fragment violated the query policy.
    #[error("Query rejected: {reason}")]
    ValidationRejected { reason: String },

    /// The model provider failed (timeout, quota, malformed response).
    #[error("Query generation failed: {message}")]
    GenerationFailure { message: String, retryable: bool },

    /// No pooled connection became available in time.
    #[error("Timed out after {}s waiting for a database connection", .waited.as_secs())]
    ConnectionTimeout { waited: Duration },

    /// The accepted fragment ran past its execution budget.
    #[error("Query execution exceeded its {}s budget", .budget.as_secs())]
    ExecutionTimeout { budget: Duration },

    /// The session's bound source changed or no longer matches the fragment.
    #[error("Schema mismatch: {reason}")]
    SchemaMismatch { reason: String },

    /// The session id is unknown or the session expired.
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// The caller cancelled the request.
    #[error("Query cancelled")]
    Cancelled,

    /// Unexpected failure; details are only in the logs under `incident`.
    #[error("Internal fault (incident {incident})")]
    InternalFault { incident: String },
}

impl QueryError {
    /// Creates a ValidationRejected error
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::ValidationRejected {
            reason: reason.into(),
        }
    }

    /// Creates a SchemaMismatch error
    pub fn schema_mismatch(reason: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            reason: reason.into(),
        }
    }

    /// Creates an InternalFault with a fresh incident id.
    ///
    /// The caller is expected to log the underlying cause with the returned
    /// incident id before surfacing the error.
    pub fn internal_fault() -> Self {
        Self::InternalFault {
            incident: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Short machine-readable name of the variant, used in audit logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ValidationRejected { .. } => "validation_rejected",
            Self::GenerationFailure { .. } => "generation_failure",
            Self::ConnectionTimeout { .. } => "connection_timeout",
            Self::ExecutionTimeout { .. } => "execution_timeout",
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::Cancelled => "cancelled",
            Self::InternalFault { .. } => "internal_fault",
        }
    }

    /// Whether the caller may reasonably retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::GenerationFailure { retryable, .. } => *retryable,
            Self::ConnectionTimeout { .. } | Self::ExecutionTimeout { .. } => true,
            _ => false,
        }
    }
}

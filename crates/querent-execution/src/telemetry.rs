//! Tracing subscriber initialisation.

use crate::audit::{AUDIT_TARGET, AuditEventLayer};
use querent_core::config::LoggingConfig;
use querent_core::error::{QuerentError, Result};
use tracing::Metadata;
use tracing_subscriber::filter::FilterFn;
use tracing_subscriber::fmt;
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Resolves the log filter: `RUST_LOG` first, then the configured level.
///
/// An unparsable configured level falls back to `info` with a warning on
/// stderr, since no subscriber exists yet to report it.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        level.parse::<EnvFilter>().unwrap_or_else(|err| {
            eprintln!("WARN: invalid log filter '{level}' ({err}), falling back to 'info'");
            EnvFilter::new("info")
        })
    })
}

fn without_audit(meta: &Metadata<'_>) -> bool {
    meta.target() != AUDIT_TARGET
}

fn everything(_meta: &Metadata<'_>) -> bool {
    true
}

/// Installs the global subscriber.
///
/// Log lines go to stderr so command output on stdout stays clean. When
/// `audit` is given, audit events go to its channel instead of the console.
///
/// # Errors
///
/// Returns `QuerentError::Internal` if a global subscriber is already set.
pub fn init_tracing(config: &LoggingConfig, audit: Option<AuditEventLayer>) -> Result<()> {
    let console: FilterFn = FilterFn::new(if audit.is_some() { without_audit } else { everything });
    let registry = tracing_subscriber::registry()
        .with(build_filter(&config.level))
        .with(audit);

    let installed = if config.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr)
                    .with_filter(console),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr)
                    .with_filter(console),
            )
            .try_init()
    };

    installed.map_err(|err| QuerentError::internal(format!("failed to install tracing subscriber: {err}")))
}

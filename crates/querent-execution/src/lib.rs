//! Execution layer for Querent.
//!
//! - [`sandbox`]: runs accepted fragments under row, time and cancellation limits
//! - [`audit`]: per-attempt audit records and the layer that forwards them
//! - [`telemetry`]: tracing subscriber initialisation

pub mod audit;
pub mod sandbox;
pub mod telemetry;

pub use audit::{AUDIT_TARGET, AuditEvent, AuditEventLayer, AuditRecord};
pub use sandbox::{ExecutionError, SandboxExecutor, SandboxLimits};
pub use telemetry::init_tracing;

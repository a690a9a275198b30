//! Application layer for Querent.
//!
//! Use cases that coordinate the domain with its adapters:
//!
//! - [`SessionService`]: binding sources to sessions and reading history
//! - [`QueryEngine`]: the question → fragment → verdict → result pipeline
//! - [`QueryApp`]: wiring both from a [`QuerentConfig`](querent_core::config::QuerentConfig)

pub mod answer;
pub mod bootstrap;
pub mod metrics;
pub mod query_usecase;
pub mod session_service;

pub use bootstrap::QueryApp;
pub use metrics::{PerformanceSummary, QueryMetrics};
pub use query_usecase::QueryEngine;
pub use session_service::{DataSource, SessionService};

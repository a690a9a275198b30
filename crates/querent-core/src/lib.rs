//! Domain layer for Querent: natural-language questions over bound data.
//!
//! Nothing in this crate performs I/O. Adapters for databases, model
//! providers and configuration files live in the sibling crates and plug in
//! through the traits defined here ([`agent::FragmentAgent`],
//! [`relational::RelationalExecutor`], [`session::SessionRepository`]).

pub mod agent;
pub mod config;
pub mod error;
pub mod frame;
pub mod relational;
pub mod schema;
pub mod security;
pub mod session;
pub mod table;

// Re-export common error types
pub use error::{QueryError, QuerentError};

//! Infrastructure layer for Querent.
//!
//! Adapters behind the traits declared in `querent-core`:
//!
//! - [`config_service::ConfigService`]: layered configuration loading
//! - [`connection_manager::ConnectionManager`]: pooled read-only SQLite access
//! - [`in_memory_session_repository::InMemorySessionRepository`]: session store
//! - [`secret_storage::SecretStorage`]: API keys from `secret.json`

pub mod config_service;
pub mod connection_manager;
pub mod in_memory_session_repository;
pub mod paths;
pub mod secret_storage;

pub use config_service::ConfigService;
pub use connection_manager::{ConnectionManager, ScopedConnection};
pub use in_memory_session_repository::InMemorySessionRepository;
pub use paths::QuerentPaths;
pub use secret_storage::{SecretConfig, SecretStorage};

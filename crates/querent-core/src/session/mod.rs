//! Session domain module.
//!
//! # Module Structure
//!
//! - `model`: bound sources, bindings, interactions and the `Session` itself
//! - `repository`: storage trait for live sessions

mod model;
mod repository;

pub use model::{
    BindingSnapshot, Binding, BoundSource, DataMode, DatabaseHandle, FragmentKind, Interaction,
    Session, TablePreview,
};
pub use repository::SessionRepository;

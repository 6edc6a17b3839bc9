//! Layered configuration for the launcher.
//!
//! Sources are loaded independently into [`ConfigLayer`]s, merged by
//! priority, and validated once into a [`Config`].

pub mod error;
pub mod layer;
pub mod model;
pub mod resolve;
pub mod sources;

pub use error::ConfigError;
pub use layer::ConfigLayer;
pub use model::{Config, LogFormat, RunMode, ServerBackend};
pub use resolve::{ConfigResolver, ResolveRequest};

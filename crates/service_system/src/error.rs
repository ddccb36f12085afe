//! Error types for service loading and lifecycle management.

use actor_system::{ActorError, ServiceId};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The dynamic library could not be loaded.
    #[error("failed to load module {path}: {source}")]
    LoadFailed {
        path: PathBuf,
        source: libloading::Error,
    },

    /// A required export is absent from the module.
    #[error("module is missing symbol {symbol}: {source}")]
    SymbolMissing {
        symbol: String,
        source: libloading::Error,
    },

    /// The module's creation symbol returned null.
    #[error("module creation symbol returned null")]
    NullInstance,

    /// A configured service directory does not exist.
    #[error("service directory missing: {0}")]
    DirectoryMissing(PathBuf),

    /// A service with this name is already registered.
    #[error("service {0} is already registered")]
    DuplicateName(String),

    /// The context is not in the state the operation requires.
    #[error("service {0} lifecycle violation: {1}")]
    Lifecycle(ServiceId, &'static str),

    /// No running service under this identifier.
    #[error("service {0} not found")]
    NotFound(ServiceId),

    #[error(transparent)]
    Actor(#[from] ActorError),
}

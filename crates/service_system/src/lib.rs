//! Service module loading with safe lifecycle management.
//!
//! Provides dynamic service loading over the create/destroy symbol
//! contract, per-service hosting contexts, and the registry other actors
//! route against.
//!
//! The host treats loaded code purely through the [`actor_system::Service`]
//! trait: instances are created by a module's `create_service` export and
//! destroyed by its `destroy_service` export, never by a generic
//! destructor, and every instance carries a reference-counted handle to
//! its library so code cannot unload while in use.

pub mod context;
pub mod error;
pub mod library;
pub mod registry;

pub use context::ServiceContext;
pub use error::ServiceError;
pub use library::{PlayerInstance, ServiceInstance, ServiceLibrary};
pub use registry::ServiceRegistry;

//! Reference-counted dynamic library handles and actor instances.
//!
//! A [`ServiceLibrary`] is a copyable, ref-counted wrapper around one
//! loaded code module; the module unloads when the last clone drops. Actor
//! instances created from a module carry their library handle with them,
//! so code can never outlive the module that contains it, and destruction
//! always goes through the module's own destroy symbol rather than a
//! generic destructor.

use crate::error::ServiceError;
use actor_system::{
    CreatePlayerFn, CreateServiceFn, DestroyPlayerFn, DestroyServiceFn, Player, Service,
    CREATE_PLAYER_SYMBOL, CREATE_SERVICE_SYMBOL, DESTROY_PLAYER_SYMBOL, DESTROY_SERVICE_SYMBOL,
};
use libloading::Library;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

struct LibraryInner {
    library: Library,
    path: PathBuf,
}

impl Drop for LibraryInner {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "unloading service module");
    }
}

/// Copyable handle to a loaded code module.
#[derive(Clone)]
pub struct ServiceLibrary {
    inner: Arc<LibraryInner>,
}

impl ServiceLibrary {
    /// Load the module at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServiceError> {
        let path = path.as_ref();
        let library = unsafe {
            Library::new(path).map_err(|source| ServiceError::LoadFailed {
                path: path.to_path_buf(),
                source,
            })?
        };
        debug!(path = %path.display(), "loaded service module");
        Ok(Self {
            inner: Arc::new(LibraryInner {
                library,
                path: path.to_path_buf(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Number of live handles to this module.
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Typed lookup of an exported symbol; `T` must be a function pointer.
    pub fn symbol<T: Copy>(&self, name: &[u8]) -> Result<T, ServiceError> {
        unsafe {
            let symbol: libloading::Symbol<T> =
                self.inner
                    .library
                    .get(name)
                    .map_err(|source| ServiceError::SymbolMissing {
                        symbol: String::from_utf8_lossy(name).into_owned(),
                        source,
                    })?;
            Ok(*symbol)
        }
    }

    /// Instantiate the module's service through its creation symbol.
    pub fn create_service(&self) -> Result<ServiceInstance, ServiceError> {
        let create: CreateServiceFn = self.symbol(CREATE_SERVICE_SYMBOL)?;
        let destroy: DestroyServiceFn = self.symbol(DESTROY_SERVICE_SYMBOL)?;

        let ptr = unsafe { create() };
        if ptr.is_null() {
            return Err(ServiceError::NullInstance);
        }
        Ok(ServiceInstance {
            kind: ServiceInstanceKind::Loaded {
                ptr,
                destroy,
                _library: self.clone(),
            },
        })
    }

    /// Instantiate the module's player actor through its creation symbol.
    pub fn create_player(&self) -> Result<PlayerInstance, ServiceError> {
        let create: CreatePlayerFn = self.symbol(CREATE_PLAYER_SYMBOL)?;
        let destroy: DestroyPlayerFn = self.symbol(DESTROY_PLAYER_SYMBOL)?;

        let ptr = unsafe { create() };
        if ptr.is_null() {
            return Err(ServiceError::NullInstance);
        }
        Ok(PlayerInstance {
            kind: PlayerInstanceKind::Loaded {
                ptr,
                destroy,
                _library: self.clone(),
            },
        })
    }
}

enum ServiceInstanceKind {
    /// Created by a loaded module; destroyed through its destroy symbol.
    Loaded {
        ptr: *mut dyn Service,
        destroy: DestroyServiceFn,
        _library: ServiceLibrary,
    },
    /// In-process service (built-ins and tests); ordinary ownership.
    Local(Option<Box<dyn Service>>),
}

/// Owning pointer to one service actor.
pub struct ServiceInstance {
    kind: ServiceInstanceKind,
}

// The pointee came out of a `Box<dyn Service>` on the module side, and
// `Service` requires `Send`.
unsafe impl Send for ServiceInstance {}

impl ServiceInstance {
    /// Wrap an in-process service; used by built-in services and tests.
    pub fn local(service: Box<dyn Service>) -> Self {
        Self {
            kind: ServiceInstanceKind::Local(Some(service)),
        }
    }
}

impl Deref for ServiceInstance {
    type Target = dyn Service;

    fn deref(&self) -> &dyn Service {
        match &self.kind {
            ServiceInstanceKind::Loaded { ptr, .. } => unsafe { &**ptr },
            ServiceInstanceKind::Local(service) => match service.as_deref() {
                Some(service) => service,
                None => unreachable!("local service taken before drop"),
            },
        }
    }
}

impl DerefMut for ServiceInstance {
    fn deref_mut(&mut self) -> &mut dyn Service {
        match &mut self.kind {
            ServiceInstanceKind::Loaded { ptr, .. } => unsafe { &mut **ptr },
            ServiceInstanceKind::Local(service) => match service.as_deref_mut() {
                Some(service) => service,
                None => unreachable!("local service taken before drop"),
            },
        }
    }
}

impl Drop for ServiceInstance {
    fn drop(&mut self) {
        if let ServiceInstanceKind::Loaded { ptr, destroy, .. } = &self.kind {
            unsafe { destroy(*ptr) };
        }
    }
}

enum PlayerInstanceKind {
    Loaded {
        ptr: *mut dyn Player,
        destroy: DestroyPlayerFn,
        _library: ServiceLibrary,
    },
    Local(Option<Box<dyn Player>>),
}

/// Owning pointer to one player actor.
pub struct PlayerInstance {
    kind: PlayerInstanceKind,
}

unsafe impl Send for PlayerInstance {}

impl PlayerInstance {
    /// Wrap an in-process player; used by tests.
    pub fn local(player: Box<dyn Player>) -> Self {
        Self {
            kind: PlayerInstanceKind::Local(Some(player)),
        }
    }
}

impl Deref for PlayerInstance {
    type Target = dyn Player;

    fn deref(&self) -> &dyn Player {
        match &self.kind {
            PlayerInstanceKind::Loaded { ptr, .. } => unsafe { &**ptr },
            PlayerInstanceKind::Local(player) => match player.as_deref() {
                Some(player) => player,
                None => unreachable!("local player taken before drop"),
            },
        }
    }
}

impl DerefMut for PlayerInstance {
    fn deref_mut(&mut self) -> &mut dyn Player {
        match &mut self.kind {
            PlayerInstanceKind::Loaded { ptr, .. } => unsafe { &mut **ptr },
            PlayerInstanceKind::Local(player) => match player.as_deref_mut() {
                Some(player) => player,
                None => unreachable!("local player taken before drop"),
            },
        }
    }
}

impl Drop for PlayerInstance {
    fn drop(&mut self) {
        if let PlayerInstanceKind::Loaded { ptr, destroy, .. } = &self.kind {
            unsafe { destroy(*ptr) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actor_system::Actor;

    struct Dummy {
        name: String,
    }

    impl Actor for Dummy {}

    impl Service for Dummy {
        fn name(&self) -> &str {
            &self.name
        }
    }

    #[test]
    fn local_instance_derefs_to_service() {
        let inst = ServiceInstance::local(Box::new(Dummy {
            name: "dummy".into(),
        }));
        assert_eq!(inst.name(), "dummy");
    }

    #[test]
    fn loading_missing_module_fails() {
        let err = ServiceLibrary::load("/nonexistent/path/libnothing.so")
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(err.contains("failed to load module"));
    }
}

//! The service registry: module loading and the name/ID directory.
//!
//! Services are loaded from two directories: `core` modules are mandatory
//! (a load failure is fatal to startup) and `extend` modules are optional
//! extensions. Loading is two-phase — every context is created and
//! initialized before any service boots — so services can rely on the
//! whole directory being populated by the time their `on_boot` runs.
//! Shutdown walks the boot order in reverse.

use crate::context::ServiceContext;
use crate::error::ServiceError;
use crate::library::{ServiceInstance, ServiceLibrary};
use actor_system::{EventBus, Router, ServiceId, SyncIdentAllocator};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// How long a service gets to drain before shutdown is forced.
const SERVICE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Loads service modules and resolves services by id or name.
pub struct ServiceRegistry {
    core_libraries: RwLock<HashMap<String, ServiceLibrary>>,
    extend_libraries: RwLock<HashMap<String, ServiceLibrary>>,
    services: RwLock<HashMap<ServiceId, Arc<ServiceContext>>>,
    name_to_id: RwLock<HashMap<String, ServiceId>>,
    boot_order: RwLock<Vec<ServiceId>>,
    alloc: SyncIdentAllocator,
    router: OnceLock<Arc<dyn Router>>,
    events: Arc<EventBus>,
    ticker_stop: watch::Sender<bool>,
    weak_self: Weak<Self>,
}

impl ServiceRegistry {
    pub fn new(events: Arc<EventBus>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            core_libraries: RwLock::new(HashMap::new()),
            extend_libraries: RwLock::new(HashMap::new()),
            services: RwLock::new(HashMap::new()),
            name_to_id: RwLock::new(HashMap::new()),
            boot_order: RwLock::new(Vec::new()),
            alloc: SyncIdentAllocator::new(),
            router: OnceLock::new(),
            events,
            ticker_stop: watch::channel(false).0,
            weak_self: weak_self.clone(),
        })
    }

    /// Start the shared update ticker: every `interval`, each running
    /// service receives a tick node through its own channel.
    pub fn start_ticker(&self, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        let registry = self.weak_self.clone();
        let mut stop = self.ticker_stop.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut previous = Instant::now();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else { return };
                        let now = Instant::now();
                        let delta = now.saturating_duration_since(previous);
                        previous = now;

                        let services: Vec<Arc<ServiceContext>> =
                            registry.services.read().values().cloned().collect();
                        for ctx in services {
                            // A stopping service rejects the node; that is
                            // its business, not the ticker's.
                            let _ = ctx.post_tick(now, delta);
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Install the router services address each other through. Must happen
    /// before any module is loaded.
    pub fn set_router(&self, router: Arc<dyn Router>) {
        let _ = self.router.set(router);
    }

    fn router(&self) -> Arc<dyn Router> {
        match self.router.get() {
            Some(router) => Arc::clone(router),
            None => Arc::new(actor_system::NullRouter),
        }
    }

    /// Load and initialize every module under the core and extend
    /// directories, then boot all services.
    ///
    /// A missing or unloadable core directory/module is an error the
    /// caller should treat as fatal; extend problems are logged and
    /// skipped.
    pub fn load_directories(
        &self,
        core_dir: &Path,
        extend_dir: &Path,
    ) -> Result<(), ServiceError> {
        if !core_dir.is_dir() {
            return Err(ServiceError::DirectoryMissing(core_dir.to_path_buf()));
        }

        for path in module_files(core_dir) {
            let library = ServiceLibrary::load(&path)?;
            let stem = file_stem(&path);
            self.core_libraries.write().insert(stem, library.clone());
            self.create_from_library(library)?;
        }

        if extend_dir.is_dir() {
            for path in module_files(extend_dir) {
                match ServiceLibrary::load(&path) {
                    Ok(library) => {
                        let stem = file_stem(&path);
                        self.extend_libraries.write().insert(stem, library.clone());
                        if let Err(err) = self.create_from_library(library) {
                            error!(path = %path.display(), %err, "extend service skipped");
                        }
                    }
                    Err(err) => {
                        error!(path = %path.display(), %err, "extend module failed to load");
                    }
                }
            }
        } else {
            warn!(path = %extend_dir.display(), "extend directory missing, no extensions loaded");
        }

        self.boot_all()
    }

    /// Allocate an identifier and initialize a context for one module.
    pub fn create_from_library(
        &self,
        library: ServiceLibrary,
    ) -> Result<ServiceId, ServiceError> {
        let sid = self.alloc.allocate() as ServiceId;
        let ctx = ServiceContext::new(sid, library, self.router(), Arc::clone(&self.events));
        self.install(sid, ctx)
    }

    /// Register an in-process service (built-ins and tests).
    pub fn create_local(
        &self,
        instance: ServiceInstance,
    ) -> Result<ServiceId, ServiceError> {
        let sid = self.alloc.allocate() as ServiceId;
        let ctx = ServiceContext::local(sid, instance, self.router(), Arc::clone(&self.events));
        self.install(sid, ctx)
    }

    fn install(
        &self,
        sid: ServiceId,
        ctx: Arc<ServiceContext>,
    ) -> Result<ServiceId, ServiceError> {
        ctx.initial()?;
        let name = ctx.service_name().to_string();

        {
            let mut names = self.name_to_id.write();
            if names.contains_key(&name) {
                self.alloc.recycle(sid as i64);
                return Err(ServiceError::DuplicateName(name));
            }
            names.insert(name.clone(), sid);
        }
        self.services.write().insert(sid, ctx);
        self.boot_order.write().push(sid);

        info!(service = sid, name, "service registered");
        Ok(sid)
    }

    /// Boot every initialized service in registration order.
    pub fn boot_all(&self) -> Result<(), ServiceError> {
        let order = self.boot_order.read().clone();
        for sid in order {
            if let Some(ctx) = self.find(sid) {
                ctx.boot()?;
            }
        }
        Ok(())
    }

    pub fn find(&self, sid: ServiceId) -> Option<Arc<ServiceContext>> {
        self.services.read().get(&sid).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<ServiceContext>> {
        let sid = *self.name_to_id.read().get(name)?;
        self.find(sid)
    }

    pub fn resolve_name(&self, name: &str) -> Option<ServiceId> {
        self.name_to_id.read().get(name).copied()
    }

    pub fn service_count(&self) -> usize {
        self.services.read().len()
    }

    /// Stop one service and drop it from the directory.
    pub fn unload(&self, sid: ServiceId) -> Result<(), ServiceError> {
        let ctx = {
            let mut services = self.services.write();
            services.remove(&sid).ok_or(ServiceError::NotFound(sid))?
        };
        self.name_to_id
            .write()
            .retain(|_, mapped| *mapped != sid);
        self.boot_order.write().retain(|mapped| *mapped != sid);

        ctx.shutdown(SERVICE_SHUTDOWN_TIMEOUT);
        self.alloc.recycle(sid as i64);
        Ok(())
    }

    /// Stop everything in reverse boot order.
    pub fn shutdown_all(&self) {
        let _ = self.ticker_stop.send(true);
        let order: Vec<ServiceId> = {
            let order = self.boot_order.read();
            order.iter().rev().copied().collect()
        };
        for sid in order {
            if let Some(ctx) = self.find(sid) {
                info!(service = sid, name = ctx.service_name(), "stopping service");
                ctx.shutdown(SERVICE_SHUTDOWN_TIMEOUT);
            }
        }
        self.services.write().clear();
        self.name_to_id.write().clear();
        self.boot_order.write().clear();
    }
}

fn module_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext == std::env::consts::DLL_EXTENSION)
        })
        .collect();
    files.sort();
    files
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actor_system::{Actor, ActorHost, Packet, Service};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        name: String,
        seen: Arc<AtomicUsize>,
    }

    impl Actor for Counting {
        fn on_package(&mut self, _host: &ActorHost, _pkg: &Packet) {
            self.seen.fetch_add(1, Ordering::AcqRel);
        }
    }

    impl Service for Counting {
        fn name(&self) -> &str {
            &self.name
        }
    }

    fn counting(name: &str, seen: &Arc<AtomicUsize>) -> ServiceInstance {
        ServiceInstance::local(Box::new(Counting {
            name: name.to_string(),
            seen: Arc::clone(seen),
        }))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn registers_and_resolves_by_name() {
        let registry = ServiceRegistry::new(Arc::new(EventBus::new()));
        let seen = Arc::new(AtomicUsize::new(0));

        let sid = registry
            .create_local(counting("world", &seen))
            .expect("register");
        registry.boot_all().expect("boot");

        assert_eq!(registry.resolve_name("world"), Some(sid));
        let ctx = registry.find_by_name("world").expect("find");
        assert_eq!(ctx.service_id(), sid);

        let pkg = ctx.build_package().expect("build");
        ctx.push_package(pkg).await.expect("push");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::Acquire), 1);

        registry.shutdown_all();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_names_are_rejected() {
        let registry = ServiceRegistry::new(Arc::new(EventBus::new()));
        let seen = Arc::new(AtomicUsize::new(0));

        registry
            .create_local(counting("world", &seen))
            .expect("first");
        let err = registry.create_local(counting("world", &seen));
        assert!(matches!(err, Err(ServiceError::DuplicateName(_))));
        assert_eq!(registry.service_count(), 1);
    }

    struct Ticking {
        name: String,
        ticks: Arc<AtomicUsize>,
    }

    impl Actor for Ticking {
        fn on_tick(
            &mut self,
            _host: &ActorHost,
            _at: std::time::Instant,
            _delta: Duration,
        ) {
            self.ticks.fetch_add(1, Ordering::AcqRel);
        }
    }

    impl Service for Ticking {
        fn name(&self) -> &str {
            &self.name
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ticker_drives_service_updates() {
        let registry = ServiceRegistry::new(Arc::new(EventBus::new()));
        let ticks = Arc::new(AtomicUsize::new(0));

        registry
            .create_local(ServiceInstance::local(Box::new(Ticking {
                name: "ticking".into(),
                ticks: Arc::clone(&ticks),
            })))
            .expect("register");
        registry.boot_all().expect("boot");
        registry.start_ticker(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(ticks.load(Ordering::Acquire) >= 3);

        registry.shutdown_all();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let settled = ticks.load(Ordering::Acquire);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::Acquire), settled);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_core_directory_is_fatal() {
        let registry = ServiceRegistry::new(Arc::new(EventBus::new()));
        let missing = Path::new("/nonexistent/meridian/core");
        let err = registry.load_directories(missing, missing);
        assert!(matches!(err, Err(ServiceError::DirectoryMissing(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unload_recycles_identifier() {
        let registry = ServiceRegistry::new(Arc::new(EventBus::new()));
        let seen = Arc::new(AtomicUsize::new(0));

        let first = registry
            .create_local(counting("alpha", &seen))
            .expect("register");
        registry.boot_all().expect("boot");
        registry.unload(first).expect("unload");
        assert_eq!(registry.service_count(), 0);
        assert_eq!(registry.resolve_name("alpha"), None);

        // The freed identifier is reused for the next service.
        let second = registry
            .create_local(counting("beta", &seen))
            .expect("register");
        assert_eq!(first, second);
    }
}

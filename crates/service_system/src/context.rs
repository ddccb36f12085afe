//! The service context: one agent hosting one loaded service.
//!
//! A context pairs a loaded service instance with its own schedule channel,
//! packet pool and timer set. `initial` creates the instance through the
//! module's creation symbol; `boot` starts the drain task and queues the
//! service's `on_boot`; shutdown is two-phase (graceful with a timeout,
//! then forced). When the drain task ends, the instance is dropped, which
//! routes destruction back through the module's destroy symbol, and the
//! service identifier is invalidated.

use crate::error::ServiceError;
use crate::library::{ServiceInstance, ServiceLibrary};
use actor_system::{
    agent_channel, run_agent, ActorHost, ActorKind, AgentChannel, AgentHandle, AgentReceiver,
    AgentState, EventBus, EventParam, Mailbox, PacketHandle, PacketPool, PoolConfig, Router,
    Service, ServiceId, ServiceTask, TimerManager, AGENT_CHANNEL_CAPACITY,
};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info};

/// Packets pre-allocated per service pool.
const SERVICE_POOL_CAPACITY: usize = 64;

/// Hosting state for one service actor.
pub struct ServiceContext {
    channel: Arc<AgentChannel<dyn Service>>,
    receiver: Mutex<Option<AgentReceiver<dyn Service>>>,
    pending: Mutex<Option<ServiceInstance>>,
    name: OnceLock<String>,
    pool: PacketPool,
    timers: Arc<TimerManager>,
    router: Arc<dyn Router>,
    events: Arc<EventBus>,
    library: Option<ServiceLibrary>,
}

impl ServiceContext {
    /// Create a context for service `sid` backed by a loaded module.
    pub fn new(
        sid: ServiceId,
        library: ServiceLibrary,
        router: Arc<dyn Router>,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        Self::build(sid, Some(library), router, events)
    }

    /// Create a context hosting an in-process service instance.
    pub fn local(
        sid: ServiceId,
        instance: ServiceInstance,
        router: Arc<dyn Router>,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        let ctx = Self::build(sid, None, router, events);
        *ctx.pending.lock() = Some(instance);
        ctx
    }

    fn build(
        sid: ServiceId,
        library: Option<ServiceLibrary>,
        router: Arc<dyn Router>,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        let (channel, receiver) = agent_channel::<dyn Service>(sid as i64, AGENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            channel: Arc::new(channel),
            receiver: Mutex::new(Some(receiver)),
            pending: Mutex::new(None),
            name: OnceLock::new(),
            pool: PacketPool::new(PoolConfig::default()),
            timers: Arc::new(TimerManager::new()),
            router,
            events,
            library,
        })
    }

    /// Create the service instance and prepare the context.
    ///
    /// Separated from [`ServiceContext::boot`] so every module can register
    /// before any service starts handling traffic.
    pub fn initial(&self) -> Result<(), ServiceError> {
        let state = self.channel.state();
        if state != AgentState::Created {
            return Err(ServiceError::Lifecycle(
                self.service_id(),
                "initial() requires a fresh context",
            ));
        }

        let mut pending = self.pending.lock();
        if pending.is_none() {
            let library = self
                .library
                .as_ref()
                .ok_or(ServiceError::NullInstance)?;
            *pending = Some(library.create_service()?);
        }

        let instance = match pending.as_ref() {
            Some(instance) => instance,
            None => return Err(ServiceError::NullInstance),
        };
        let _ = self.name.set(instance.name().to_string());

        self.pool.initial(SERVICE_POOL_CAPACITY)?;
        self.channel.mark_initialized();
        debug!(service = self.service_id(), name = self.service_name(), "service context initialized");
        Ok(())
    }

    /// Start the drain task and queue the service's boot callback.
    pub fn boot(&self) -> Result<(), ServiceError> {
        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| ServiceError::Lifecycle(self.service_id(), "already booted"))?;
        let instance = self
            .pending
            .lock()
            .take()
            .ok_or_else(|| ServiceError::Lifecycle(self.service_id(), "initial() not called"))?;

        let host = self.make_host();
        self.channel
            .post_task(Box::new(|service, host| service.on_boot(host)))?;

        let name = self.service_name().to_string();
        let sid = self.service_id();
        let events = Arc::clone(&self.events);
        tokio::spawn(run_agent(
            receiver,
            instance,
            host,
            move |instance, _host| {
                // Listener registrations die with the agent.
                events.remove_service(sid as i64);
                // Dropping the instance routes through the module's
                // destroy symbol.
                drop(instance);
                info!(service = sid, name, "service stopped");
            },
        ));

        info!(service = sid, name = self.service_name(), "service booted");
        Ok(())
    }

    fn make_host(&self) -> ActorHost {
        ActorHost::new(
            self.channel.shared().id(),
            ActorKind::Service,
            self.pool.clone(),
            Arc::clone(&self.router),
            Arc::clone(&self.events),
            Arc::clone(&self.timers),
            self.handle(),
        )
    }

    /// Weak, id-keyed address of this context's mailbox.
    pub fn handle(&self) -> AgentHandle {
        let erased: Arc<dyn Mailbox> = Arc::clone(&self.channel) as Arc<dyn Mailbox>;
        AgentHandle::new(self.channel.shared().id(), Arc::downgrade(&erased))
    }

    pub fn service_id(&self) -> ServiceId {
        self.channel.shared().id() as ServiceId
    }

    pub fn service_name(&self) -> &str {
        self.name.get().map_or("", String::as_str)
    }

    pub fn state(&self) -> AgentState {
        self.channel.state()
    }

    /// Check out a packet from this service's pool.
    pub fn build_package(&self) -> Result<PacketHandle, ServiceError> {
        Ok(self.pool.acquire()?)
    }

    /// Ordered delivery of a package to this service.
    pub async fn push_package(&self, pkg: PacketHandle) -> Result<(), ServiceError> {
        Ok(self.channel.push_package(pkg).await?)
    }

    /// Ordered delivery of a task to this service.
    pub async fn push_task(&self, task: ServiceTask) -> Result<(), ServiceError> {
        Ok(self.channel.push_task(task).await?)
    }

    /// Ordered delivery of an event to this service.
    pub async fn push_event(&self, event: Arc<dyn EventParam>) -> Result<(), ServiceError> {
        Ok(self.channel.push_event(event).await?)
    }

    /// Fire-and-forget delivery for non-async callers.
    pub fn post_package(&self, pkg: PacketHandle) -> Result<(), ServiceError> {
        Ok(self.channel.post_package(pkg)?)
    }

    /// Fire-and-forget task delivery for non-async callers.
    pub fn post_task(&self, task: ServiceTask) -> Result<(), ServiceError> {
        Ok(self.channel.post_task(task)?)
    }

    /// Deliver a tick through the schedule channel.
    pub fn post_tick(
        &self,
        at: std::time::Instant,
        delta: Duration,
    ) -> Result<(), ServiceError> {
        let mailbox: &AgentChannel<dyn Service> = &self.channel;
        Ok(Mailbox::post_tick(mailbox, at, delta)?)
    }

    /// Request a graceful stop, forcing it after `timeout`.
    pub fn shutdown(&self, timeout: Duration) {
        self.channel.request_shutdown(timeout);
    }

    /// Close the channel immediately.
    pub fn force_shutdown(&self) {
        self.channel.force_shutdown();
    }

    pub fn timers(&self) -> &Arc<TimerManager> {
        &self.timers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actor_system::{Actor, NullRouter, Packet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        name: String,
        seen: Arc<AtomicUsize>,
        booted: Arc<AtomicUsize>,
    }

    impl Actor for Echo {
        fn on_package(&mut self, _host: &ActorHost, _pkg: &Packet) {
            self.seen.fetch_add(1, Ordering::AcqRel);
        }
    }

    impl Service for Echo {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_boot(&mut self, _host: &ActorHost) {
            self.booted.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn local_context(
        seen: Arc<AtomicUsize>,
        booted: Arc<AtomicUsize>,
    ) -> Arc<ServiceContext> {
        ServiceContext::local(
            3,
            ServiceInstance::local(Box::new(Echo {
                name: "echo".into(),
                seen,
                booted,
            })),
            Arc::new(NullRouter),
            Arc::new(EventBus::new()),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lifecycle_initial_boot_shutdown() {
        let seen = Arc::new(AtomicUsize::new(0));
        let booted = Arc::new(AtomicUsize::new(0));
        let ctx = local_context(Arc::clone(&seen), Arc::clone(&booted));

        ctx.initial().expect("initial");
        assert_eq!(ctx.service_name(), "echo");
        assert_eq!(ctx.state(), AgentState::Initialized);

        ctx.boot().expect("boot");
        let pkg = ctx.build_package().expect("build");
        ctx.push_package(pkg).await.expect("push");

        ctx.shutdown(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(booted.load(Ordering::Acquire), 1);
        assert_eq!(seen.load(Ordering::Acquire), 1);
        assert_eq!(ctx.state(), AgentState::Stopped);
        // Identifier invalidated on stop; the handle goes stale with it.
        assert_eq!(ctx.service_id(), actor_system::INVALID_SERVICE_ID);
        assert!(!ctx.handle().is_valid());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn initial_twice_is_rejected() {
        let ctx = local_context(Arc::default(), Arc::default());
        ctx.initial().expect("first initial");
        assert!(matches!(
            ctx.initial(),
            Err(ServiceError::Lifecycle(_, _))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn boot_before_initial_is_rejected() {
        let ctx = ServiceContext::local(
            4,
            ServiceInstance::local(Box::new(Echo {
                name: "echo".into(),
                seen: Arc::default(),
                booted: Arc::default(),
            })),
            Arc::new(NullRouter),
            Arc::new(EventBus::new()),
        );
        // pending holds the instance but initial() was never run, so the
        // channel still rejects producers.
        let pkg_err = ctx.build_package();
        assert!(pkg_err.is_err());
    }
}

//! Actor traits and the host context handed into their callbacks.
//!
//! An actor owns no threads and no channels; everything it may do to the
//! outside world goes through the [`ActorHost`] parameter its callbacks
//! receive. Callbacks are synchronous by contract: they run inside the
//! owning agent's drain loop, one at a time, and must not block.

use crate::error::ActorError;
use crate::event::{AgentHandle, EventBus, EventParam};
use crate::handle::Handle;
use crate::packet::{Packet, PacketHandle, PacketPool};
use crate::timer::{Timer, TimerManager, TimerTask};
use crate::types::{PlayerId, ServiceId, TimerId};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Base callback surface shared by services and players.
///
/// Default bodies are empty so an actor only writes the reactions it has.
pub trait Actor: Send + 'static {
    fn on_package(&mut self, host: &ActorHost, pkg: &Packet) {
        let _ = (host, pkg);
    }

    fn on_event(&mut self, host: &ActorHost, event: &dyn EventParam) {
        let _ = (host, event);
    }

    fn on_tick(&mut self, host: &ActorHost, at: Instant, delta: Duration) {
        let _ = (host, at, delta);
    }

    /// Final callback before the actor is destroyed by its loader.
    fn stop(&mut self, host: &ActorHost) {
        let _ = host;
    }
}

/// A game service: shared logic addressed by service id or name.
pub trait Service: Actor {
    fn name(&self) -> &str;

    /// Runs once on the agent's own channel after the registry boots it.
    fn on_boot(&mut self, host: &ActorHost) {
        let _ = host;
    }
}

/// A player actor: per-identity logic bound to one connection at a time.
pub trait Player: Actor {
    fn player_id(&self) -> PlayerId;

    /// Assign the identity this instance will act for. Called once, before
    /// the hosting agent boots.
    fn bind(&mut self, pid: PlayerId);

    fn on_login(&mut self, host: &ActorHost) {
        let _ = host;
    }

    fn on_logout(&mut self, host: &ActorHost) {
        let _ = host;
    }

    /// Flush persistent state; invoked during logout and takeover.
    fn save(&mut self, host: &ActorHost) {
        let _ = host;
    }
}

/// Closure executed on a service's own channel.
pub type ServiceTask = Box<dyn FnOnce(&mut dyn Service, &ActorHost) + Send>;

/// Closure executed on a player agent's own channel.
pub type PlayerTask = Box<dyn FnOnce(&mut dyn Player, &ActorHost) + Send>;

/// Which listener table an actor registers in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorKind {
    Service,
    Player,
}

/// Cross-actor delivery surface the host exposes to actors.
///
/// Implementations resolve a destination and enqueue through the target
/// agent's channel; they never call into an actor directly. Sends whose
/// resolved destination equals `source` are no-ops, preventing re-entrant
/// self-delivery through one's own channel.
pub trait Router: Send + Sync {
    /// Deliver `pkg` to the service its `target` field names.
    fn post_package(&self, source: ServiceId, pkg: PacketHandle);

    /// Deliver `pkg` to the service registered under `name`.
    fn post_package_named(&self, source: ServiceId, name: &str, pkg: PacketHandle);

    /// Run `task` on the channel of service `target`.
    fn post_service_task(&self, source: ServiceId, target: ServiceId, task: ServiceTask);

    /// Run `task` on the channel of the service registered under `name`.
    fn post_service_task_named(&self, source: ServiceId, name: &str, task: ServiceTask);

    /// Deliver `pkg` to the player agent owning `pid`.
    fn send_to_player(&self, pid: PlayerId, pkg: PacketHandle);

    /// Run `task` on the channel of the player agent owning `pid`.
    fn post_player_task(&self, pid: PlayerId, task: PlayerTask);

    /// Forward `pkg` to the client socket of player `pid`.
    fn send_to_client(&self, pid: PlayerId, pkg: PacketHandle);
}

/// Router that drops everything; used by tests and detached contexts.
#[derive(Default)]
pub struct NullRouter;

impl Router for NullRouter {
    fn post_package(&self, _source: ServiceId, _pkg: PacketHandle) {}
    fn post_package_named(&self, _source: ServiceId, _name: &str, _pkg: PacketHandle) {}
    fn post_service_task(&self, _source: ServiceId, _target: ServiceId, _task: ServiceTask) {}
    fn post_service_task_named(&self, _source: ServiceId, _name: &str, _task: ServiceTask) {}
    fn send_to_player(&self, _pid: PlayerId, _pkg: PacketHandle) {}
    fn post_player_task(&self, _pid: PlayerId, _task: PlayerTask) {}
    fn send_to_client(&self, _pid: PlayerId, _pkg: PacketHandle) {}
}

/// Everything an actor may reach while one of its callbacks runs.
///
/// Cheap to clone; the owning agent constructs it once at boot and hands a
/// reference into every callback. Package building needs no state check
/// here: a callback can only run while its agent is `Running`, so the
/// lifecycle guard is structural.
#[derive(Clone)]
pub struct ActorHost {
    id: i64,
    kind: ActorKind,
    pool: PacketPool,
    router: Arc<dyn Router>,
    events: Arc<EventBus>,
    timers: Arc<TimerManager>,
    mailbox: AgentHandle,
}

impl ActorHost {
    pub fn new(
        id: i64,
        kind: ActorKind,
        pool: PacketPool,
        router: Arc<dyn Router>,
        events: Arc<EventBus>,
        timers: Arc<TimerManager>,
        mailbox: AgentHandle,
    ) -> Self {
        Self {
            id,
            kind,
            pool,
            router,
            events,
            timers,
            mailbox,
        }
    }

    /// The hosting agent's actor identifier.
    pub fn agent_id(&self) -> i64 {
        self.id
    }

    pub fn kind(&self) -> ActorKind {
        self.kind
    }

    /// Source field for outgoing routed sends: a service uses its own id,
    /// a player agent uses the player sentinel.
    fn source_id(&self) -> ServiceId {
        match self.kind {
            ActorKind::Service => self.id as ServiceId,
            ActorKind::Player => crate::types::PLAYER_TARGET_ID,
        }
    }

    /// Check out a fresh packet from the agent's pool.
    pub fn build_package(&self) -> Result<PacketHandle, ActorError> {
        self.pool.acquire()
    }

    /// Deliver a package to the service named by its `target` field.
    pub fn post_package(&self, pkg: PacketHandle) {
        self.router.post_package(self.source_id(), pkg);
    }

    /// Deliver a package to a service by name.
    pub fn post_package_named(&self, name: &str, pkg: PacketHandle) {
        self.router.post_package_named(self.source_id(), name, pkg);
    }

    /// Run a task on another service's channel.
    pub fn post_service_task(&self, target: ServiceId, task: ServiceTask) {
        self.router.post_service_task(self.source_id(), target, task);
    }

    /// Run a task on a named service's channel.
    pub fn post_service_task_named(&self, name: &str, task: ServiceTask) {
        self.router
            .post_service_task_named(self.source_id(), name, task);
    }

    /// Deliver a package to a player agent.
    pub fn send_to_player(&self, pid: PlayerId, pkg: PacketHandle) {
        self.router.send_to_player(pid, pkg);
    }

    /// Run a task on a player agent's channel.
    pub fn post_player_task(&self, pid: PlayerId, task: PlayerTask) {
        self.router.post_player_task(pid, task);
    }

    /// Forward a package to a player's client socket.
    pub fn send_to_client(&self, pid: PlayerId, pkg: PacketHandle) {
        self.router.send_to_client(pid, pkg);
    }

    /// Arm a timer anchored to this agent.
    ///
    /// `rate <= 0` fires once; positive rates repeat until cancelled or the
    /// agent goes away. The callback is enqueued through this agent's
    /// channel, keeping callbacks serialized.
    pub fn create_timer(&self, task: TimerTask, delay: Duration, rate: Duration) -> Handle<Timer> {
        self.timers
            .create_timer(self.mailbox.clone(), task, delay, rate)
    }

    /// One-shot convenience wrapper over [`ActorHost::create_timer`].
    pub fn create_timeout(&self, task: TimerTask, delay: Duration) -> Handle<Timer> {
        self.create_timer(task, delay, Duration::ZERO)
    }

    pub fn cancel_timer(&self, id: TimerId) {
        self.timers.cancel(id);
    }

    pub fn cancel_all_timers(&self) {
        self.timers.cancel_all();
    }

    /// Register this agent for an event type in its population's table.
    pub fn listen_event(&self, event: u32) {
        match self.kind {
            ActorKind::Service => self.events.listen_service(event, self.mailbox.clone()),
            ActorKind::Player => self.events.listen_player(event, self.mailbox.clone()),
        }
    }

    pub fn remove_listener(&self, event: u32) {
        match self.kind {
            ActorKind::Service => self.events.remove_service_listener(event, self.id),
            ActorKind::Player => self.events.remove_player_listener(event, self.id),
        }
    }

    /// Fan an event out to every interested agent.
    pub fn dispatch_event(&self, event: Arc<dyn EventParam>) {
        self.events.dispatch(event);
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }
}

//! The player agent: concurrency host for one logged-in player.
//!
//! Owns the player's schedule channel, packet pool and timer set, and holds
//! the socket the player is currently attached to. The player actor itself
//! is owned by the drain task; when that task ends, the gateway decides
//! whether the actor state is cached for reconnection, handed to a
//! takeover, or destroyed.

use crate::connection::Connection;
use crate::gateway::Gateway;
use actor_system::{
    agent_channel, run_agent, ActorHost, ActorKind, AgentChannel, AgentHandle, AgentReceiver,
    AgentState, EventBus, EventParam, Mailbox, PacketHandle, PacketPool, Player, PlayerId,
    PlayerTask, PoolConfig, Router, TimerManager, CLIENT_TARGET_ID, LOGIN_RESPONSE_PACKAGE_ID,
    SERVER_SOURCE_ID, AGENT_CHANNEL_CAPACITY,
};
use parking_lot::{Mutex, RwLock};
use service_system::PlayerInstance;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{info, warn};

const PLAYER_POOL_CAPACITY: usize = 32;

/// Hosting state for one player actor.
pub struct PlayerAgent {
    pid: PlayerId,
    key: String,
    channel: Arc<AgentChannel<dyn Player>>,
    receiver: Mutex<Option<AgentReceiver<dyn Player>>>,
    pending: Mutex<Option<PlayerInstance>>,
    connection: RwLock<Option<Arc<Connection>>>,
    pool: PacketPool,
    timers: Arc<TimerManager>,
    cachable: AtomicBool,
    shutdown_timeout: Duration,
    weak_self: Weak<Self>,
}

impl PlayerAgent {
    /// Bind `instance` to `pid` and wrap it in a fresh agent attached to
    /// `conn`. The agent does not process anything until [`boot`].
    ///
    /// [`boot`]: PlayerAgent::boot
    pub fn new(
        pid: PlayerId,
        mut instance: PlayerInstance,
        conn: &Arc<Connection>,
        shutdown_timeout: Duration,
    ) -> Arc<Self> {
        instance.bind(pid);

        let (channel, receiver) = agent_channel::<dyn Player>(pid, AGENT_CHANNEL_CAPACITY);
        let pool = PacketPool::new(PoolConfig::default());
        let _ = pool.initial(PLAYER_POOL_CAPACITY);

        Arc::new_cyclic(|weak_self| Self {
            pid,
            key: conn.key().to_string(),
            channel: Arc::new(channel),
            receiver: Mutex::new(Some(receiver)),
            pending: Mutex::new(Some(instance)),
            connection: RwLock::new(Some(Arc::clone(conn))),
            pool,
            timers: Arc::new(TimerManager::new()),
            cachable: AtomicBool::new(true),
            shutdown_timeout,
            weak_self: weak_self.clone(),
        })
    }

    /// Start the drain task, queue the login callback and confirm the
    /// login to the client.
    pub fn boot(
        &self,
        gateway: &Arc<Gateway>,
        router: Arc<dyn Router>,
        events: Arc<EventBus>,
    ) -> Result<(), crate::error::ServerError> {
        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| crate::error::ServerError::Internal("agent already booted".into()))?;
        let instance = self
            .pending
            .lock()
            .take()
            .ok_or_else(|| crate::error::ServerError::Internal("agent has no player".into()))?;

        let host = ActorHost::new(
            self.pid,
            ActorKind::Player,
            self.pool.clone(),
            router,
            events,
            Arc::clone(&self.timers),
            self.handle(),
        );

        self.channel.mark_initialized();
        self.channel
            .post_task(Box::new(|player, host| player.on_login(host)))
            .map_err(crate::error::ServerError::Actor)?;

        let gateway = Arc::clone(gateway);
        let agent = self
            .weak_self
            .upgrade()
            .ok_or_else(|| crate::error::ServerError::Internal("agent dropped".into()))?;
        tokio::spawn(run_agent(
            receiver,
            instance,
            host,
            move |mut instance, host| {
                instance.on_logout(host);
                instance.save(host);
                gateway.on_agent_stopped(&agent, instance);
            },
        ));

        self.send_login_success();
        info!(player = self.pid, "player agent booted");
        Ok(())
    }

    pub fn player_id(&self) -> PlayerId {
        self.pid
    }

    /// Key of the connection this agent was born from.
    pub fn connection_key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> AgentState {
        self.channel.state()
    }

    /// Weak, id-keyed address of this agent's mailbox.
    pub fn handle(&self) -> AgentHandle {
        let erased: Arc<dyn Mailbox> = Arc::clone(&self.channel) as Arc<dyn Mailbox>;
        AgentHandle::new(self.pid, Arc::downgrade(&erased))
    }

    /// Ordered delivery of a package to the player actor.
    pub async fn push_package(&self, pkg: PacketHandle) -> Result<(), actor_system::ActorError> {
        self.channel.push_package(pkg).await
    }

    /// Fire-and-forget delivery for non-async callers.
    pub fn post_package(&self, pkg: PacketHandle) -> Result<(), actor_system::ActorError> {
        self.channel.post_package(pkg)
    }

    /// Run a task on the player's channel.
    pub fn post_task(&self, task: PlayerTask) -> Result<(), actor_system::ActorError> {
        self.channel.post_task(task)
    }

    /// Deliver an event through the player's channel.
    pub fn post_event(&self, event: Arc<dyn EventParam>) -> Result<(), actor_system::ActorError> {
        Mailbox::post_event(self.channel.as_ref(), event)
    }

    /// Forward a package to the attached client socket, if any.
    pub fn send_to_client(&self, pkg: PacketHandle) {
        let conn = self.connection.read().clone();
        match conn {
            Some(conn) => conn.send_package(pkg),
            None => warn!(player = self.pid, "send_to_client with no connection"),
        }
    }

    /// Tell the client another login took this identity over. The write
    /// loop closes the socket after flushing the notification.
    pub fn notify_repeated(&self, addr: &str) {
        let conn = self.connection.read().clone();
        match conn {
            Some(conn) => conn.send_login_repeated(addr),
            None => warn!(player = self.pid, "takeover notice with no connection"),
        }
    }

    fn send_login_success(&self) {
        if let Ok(mut pkg) = self.pool.acquire() {
            if let Some(p) = pkg.get_mut() {
                p.set_id(LOGIN_RESPONSE_PACKAGE_ID)
                    .set_source(SERVER_SOURCE_ID)
                    .set_target(CLIENT_TARGET_ID)
                    .set_text(&format!("{{\"player_id\":{}}}", self.pid));
            }
            self.send_to_client(pkg);
        }
    }

    /// Whether the actor state should be cached when this agent stops.
    pub fn is_cachable(&self) -> bool {
        self.cachable.load(Ordering::Acquire)
    }

    pub fn set_cachable(&self, cachable: bool) {
        self.cachable.store(cachable, Ordering::Release);
    }

    /// Drop the socket binding (the socket is closing underneath us).
    pub fn detach_connection(&self) {
        *self.connection.write() = None;
    }

    /// Two-phase stop: drain, then force after the configured timeout.
    pub fn request_shutdown(&self) {
        self.channel.request_shutdown(self.shutdown_timeout);
    }

    /// Immediate stop; queued nodes are abandoned.
    pub fn force_shutdown(&self) {
        self.channel.force_shutdown();
    }
}

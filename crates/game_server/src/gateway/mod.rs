//! Player session lifecycle.
//!
//! The gateway owns three tables: connections that have not logged in yet
//! (keyed by ephemeral connection key), online player agents (keyed by
//! player id), and the disconnected-player cache. Login moves a connection
//! from the first table into the second — evicting any agent already
//! holding the identity, adopting cached actor state when a reconnect
//! lands inside its grace window, or creating a fresh actor otherwise.
//!
//! Lock ordering is connecting → online → cache, and no table lock is ever
//! held across an await.

mod agent;
mod cache;
pub(crate) mod player;

pub use agent::PlayerAgent;
pub use cache::PlayerCache;
pub use player::{BasicPlayer, PlayerFactory};

use crate::connection::Connection;
use crate::error::ServerError;
use actor_system::{EventBus, PlayerId, Router};
use parking_lot::{Mutex, RwLock};
use service_system::PlayerInstance;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

/// Gateway tuning parameters.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Grace window for reconnecting without a storage reload.
    pub cache_keep_alive: Duration,
    /// Hard bound on cached disconnected players.
    pub cache_max_size: usize,
    /// Cadence of the cache collection sweep.
    pub cache_collect_interval: Duration,
    /// Grace period before an agent stop is forced.
    pub agent_shutdown_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            cache_keep_alive: Duration::from_secs(300),
            cache_max_size: 4096,
            cache_collect_interval: Duration::from_secs(30),
            agent_shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Maps player identities to live agents and manages login, logout,
/// reconnection and takeover.
pub struct Gateway {
    connecting: RwLock<HashMap<String, Arc<Connection>>>,
    online: RwLock<HashMap<PlayerId, Arc<PlayerAgent>>>,
    cache: Mutex<PlayerCache>,
    takeovers: Mutex<HashMap<PlayerId, oneshot::Sender<PlayerInstance>>>,
    factory: PlayerFactory,
    router: OnceLock<Arc<dyn Router>>,
    events: Arc<EventBus>,
    collect_stop: watch::Sender<bool>,
    config: GatewayConfig,
    weak_self: Weak<Self>,
}

impl Gateway {
    pub fn new(factory: PlayerFactory, events: Arc<EventBus>, config: GatewayConfig) -> Arc<Self> {
        let (collect_stop, _) = watch::channel(false);
        Arc::new_cyclic(|weak_self| Self {
            connecting: RwLock::new(HashMap::new()),
            online: RwLock::new(HashMap::new()),
            cache: Mutex::new(PlayerCache::new(
                config.cache_keep_alive,
                config.cache_max_size,
            )),
            takeovers: Mutex::new(HashMap::new()),
            factory,
            router: OnceLock::new(),
            events,
            collect_stop,
            config,
            weak_self: weak_self.clone(),
        })
    }

    /// Install the router player agents address services through. Must
    /// happen before the first login.
    pub fn set_router(&self, router: Arc<dyn Router>) {
        let _ = self.router.set(router);
    }

    fn router(&self) -> Arc<dyn Router> {
        match self.router.get() {
            Some(router) => Arc::clone(router),
            None => Arc::new(actor_system::NullRouter),
        }
    }

    /// Track a freshly accepted, not-yet-authenticated connection.
    pub fn register_connecting(&self, conn: &Arc<Connection>) {
        self.connecting
            .write()
            .insert(conn.key().to_string(), Arc::clone(conn));
    }

    /// Drop a connection from the pre-login table. Idempotent; part of the
    /// disconnect cascade.
    pub fn on_connection_closed(&self, conn: &Connection) {
        self.connecting.write().remove(conn.key());
    }

    pub fn find_connecting(&self, key: &str) -> Option<Arc<Connection>> {
        self.connecting.read().get(key).cloned()
    }

    pub fn find_agent(&self, pid: PlayerId) -> Option<Arc<PlayerAgent>> {
        self.online.read().get(&pid).cloned()
    }

    pub fn is_online(&self, pid: PlayerId) -> bool {
        self.online.read().contains_key(&pid)
    }

    pub fn online_count(&self) -> usize {
        self.online.read().len()
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }

    /// Promote an authenticated connection to an online player.
    ///
    /// Eviction, adoption and creation in priority order: a live agent
    /// under `pid` is superseded and its actor state adopted; otherwise
    /// cached state inside its grace window is reclaimed; otherwise the
    /// factory creates a fresh actor.
    pub async fn on_player_login(&self, key: &str, pid: PlayerId) -> Result<(), ServerError> {
        if pid <= 0 || key.is_empty() {
            return Err(ServerError::LoginRejected(format!(
                "invalid login identity {pid}"
            )));
        }

        let conn = self
            .connecting
            .write()
            .remove(key)
            .ok_or_else(|| ServerError::ConnectionNotFound(key.to_string()))?;

        // Supersede a live agent holding this identity.
        let previous = self.find_agent(pid);
        let mut instance = match previous {
            Some(old) => self.evict_and_adopt(pid, &old, conn.remote()).await,
            None => None,
        };

        // Reconnect inside the grace window skips the storage reload.
        if instance.is_none() {
            instance = self.cache.lock().reclaim(pid);
        }

        let instance = match instance {
            Some(instance) => instance,
            None => self.factory.create()?,
        };

        let agent = PlayerAgent::new(
            pid,
            instance,
            &conn,
            self.config.agent_shutdown_timeout,
        );

        // Publish under the id, catching a concurrent promotion race: the
        // loser is superseded exactly like a stale agent.
        let raced = self.online.write().insert(pid, Arc::clone(&agent));
        if let Some(stale) = raced {
            warn!(player = pid, "concurrent login promotion, superseding");
            stale.notify_repeated(conn.remote());
            stale.set_cachable(false);
            stale.force_shutdown();
        }

        let this = self
            .weak_self
            .upgrade()
            .ok_or_else(|| ServerError::Internal("gateway shutting down".into()))?;
        conn.bind_agent(&agent, pid);
        agent.boot(&this, self.router(), Arc::clone(&self.events))?;

        info!(player = pid, remote = conn.remote(), "player login complete");
        Ok(())
    }

    /// Notify the superseded agent and wait for its actor state.
    async fn evict_and_adopt(
        &self,
        pid: PlayerId,
        old: &Arc<PlayerAgent>,
        new_remote: &str,
    ) -> Option<PlayerInstance> {
        info!(player = pid, "duplicate login, evicting previous agent");

        let (tx, rx) = oneshot::channel();
        self.takeovers.lock().insert(pid, tx);

        old.notify_repeated(new_remote);
        old.request_shutdown();

        let grace = self.config.agent_shutdown_timeout * 2;
        match tokio::time::timeout(grace, rx).await {
            Ok(Ok(instance)) => Some(instance),
            _ => {
                // Stuck or already gone; fall back to cache/fresh load.
                self.takeovers.lock().remove(&pid);
                warn!(player = pid, "takeover handoff timed out");
                None
            }
        }
    }

    /// Called by an agent's drain task as it stops, with the actor state.
    ///
    /// Priority: a pending takeover adopts the state; otherwise a cachable
    /// agent parks it in the grace cache; otherwise it is destroyed.
    pub fn on_agent_stopped(&self, agent: &Arc<PlayerAgent>, instance: PlayerInstance) {
        let pid = agent.player_id();

        {
            let mut online = self.online.write();
            if let Some(current) = online.get(&pid) {
                if Arc::ptr_eq(current, agent) {
                    online.remove(&pid);
                }
            }
        }
        self.events.remove_player(pid);

        let mut instance = instance;
        if let Some(waiter) = self.takeovers.lock().remove(&pid) {
            match waiter.send(instance) {
                Ok(()) => {
                    debug!(player = pid, "actor state handed to takeover");
                    return;
                }
                Err(returned) => instance = returned,
            }
        }

        if agent.is_cachable() {
            self.cache.lock().insert(pid, instance);
        } else {
            debug!(player = pid, "actor state destroyed on logout");
        }
    }

    /// Disconnect-side logout: stop the agent for `pid` if it is online.
    pub fn on_player_logout(&self, pid: PlayerId) {
        if let Some(agent) = self.find_agent(pid) {
            agent.set_cachable(false);
            agent.request_shutdown();
        }
    }

    /// Start the periodic cache collection sweep.
    pub fn start_collection(&self) {
        let interval = self.config.cache_collect_interval;
        if interval.is_zero() {
            return;
        }
        let gateway = self.weak_self.clone();
        let mut stop = self.collect_stop.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(gateway) = gateway.upgrade() else { return };
                        gateway.cache.lock().collect();
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

    /// Stop everything: collection, online agents, pending connections and
    /// the cache.
    pub fn shutdown(&self) {
        let _ = self.collect_stop.send(true);

        let agents: Vec<Arc<PlayerAgent>> = self.online.read().values().cloned().collect();
        for agent in agents {
            agent.request_shutdown();
        }

        let pending: Vec<Arc<Connection>> = self.connecting.read().values().cloned().collect();
        for conn in pending {
            conn.disconnect();
        }

        self.cache.lock().clear();
        info!("gateway shut down");
    }
}

//! The `GameServer`: component wiring, accept loops and shutdown.
//!
//! The server owns no game logic. It wires the event bus, service
//! registry, gateway, router, login and persistence queue together, binds
//! the listener (optionally several SO_REUSEPORT accept loops), and feeds
//! accepted sockets to [`Connection::spawn`]. Transient accept errors are
//! logged and the loop keeps serving; startup failures are returned to the
//! binary, which maps them to distinct exit codes.

use crate::config::GameServerConfig;
use crate::connection::Connection;
use crate::data::DataAccess;
use crate::error::ServerError;
use crate::gateway::{Gateway, GatewayConfig, PlayerFactory};
use crate::login::{JsonLoginHandler, LoginAuth, LoginHandler};
use crate::router::MessageRouter;
use actor_system::{EventBus, Router, SyncIdentAllocator};
use futures::stream::{FuturesUnordered, StreamExt};
use service_system::ServiceRegistry;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// The core server: infrastructure only, all game logic in services.
pub struct GameServer {
    config: GameServerConfig,
    events: Arc<EventBus>,
    registry: Arc<ServiceRegistry>,
    gateway: Arc<Gateway>,
    router: Arc<MessageRouter>,
    login: Arc<LoginAuth>,
    data: DataAccess,
    conn_ids: SyncIdentAllocator,
    shutdown_sender: broadcast::Sender<()>,
}

impl GameServer {
    /// Wire all components. Uses the built-in JSON login handler; see
    /// [`GameServer::with_login_handler`] for deployments with their own.
    pub fn new(config: GameServerConfig) -> Result<Self, ServerError> {
        Self::with_login_handler(config, Box::new(JsonLoginHandler))
    }

    pub fn with_login_handler(
        config: GameServerConfig,
        handler: Box<dyn LoginHandler>,
    ) -> Result<Self, ServerError> {
        let events = Arc::new(EventBus::new());

        let factory = match &config.player_module {
            Some(path) => PlayerFactory::module(path)?,
            None => PlayerFactory::basic(),
        };

        let gateway = Gateway::new(
            factory,
            Arc::clone(&events),
            GatewayConfig {
                cache_keep_alive: config.cache_keep_alive,
                cache_max_size: config.cache_max_size,
                cache_collect_interval: config.cache_collect_interval,
                agent_shutdown_timeout: config.agent_shutdown_timeout,
            },
        );

        let registry = ServiceRegistry::new(Arc::clone(&events));
        let router = MessageRouter::new(Arc::clone(&registry), Arc::clone(&gateway));
        registry.set_router(router.clone() as Arc<dyn Router>);
        gateway.set_router(router.clone() as Arc<dyn Router>);

        let login = LoginAuth::new(handler, &gateway);
        let data = DataAccess::new(config.data_workers);
        let (shutdown_sender, _) = broadcast::channel(1);

        Ok(Self {
            config,
            events,
            registry,
            gateway,
            router,
            login,
            data,
            conn_ids: SyncIdentAllocator::new(),
            shutdown_sender,
        })
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub fn data(&self) -> &DataAccess {
        &self.data
    }

    /// Load services, bind listeners and serve until shutdown.
    pub async fn start(&self) -> Result<(), ServerError> {
        info!("starting game server on {}", self.config.listen_addr);

        self.registry
            .load_directories(&self.config.core_service_dir, &self.config.extend_service_dir)?;
        info!(services = self.registry.service_count(), "services running");

        self.registry.start_ticker(self.config.service_tick_interval);
        self.gateway.start_collection();

        let core_count = num_cpus::get();
        let acceptors = self.config.accept_loops.clamp(1, core_count);
        info!(cores = core_count, acceptors, "binding listener(s)");

        let mut listeners = Vec::new();
        for index in 0..acceptors {
            let listener = self.bind_listener(acceptors > 1)?;
            info!(listener = index, addr = %self.config.listen_addr, "listener bound");
            listeners.push(listener);
        }

        let mut shutdown = self.shutdown_sender.subscribe();

        let mut accept_loops = listeners
            .into_iter()
            .map(|listener| self.accept_loop(listener))
            .collect::<FuturesUnordered<_>>();

        tokio::select! {
            _ = accept_loops.next() => {
                // An accept loop only returns on an unrecoverable listener
                // failure.
                error!("accept loop terminated");
            }
            _ = shutdown.recv() => {
                info!("shutdown signal received");
            }
        }

        self.cleanup();
        Ok(())
    }

    fn bind_listener(&self, reuse_port: bool) -> Result<TcpListener, ServerError> {
        let domain = if self.config.listen_addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ServerError::Network(format!("socket creation failed: {e}")))?;
        socket.set_reuse_address(true).ok();

        if reuse_port {
            #[cfg(unix)]
            if let Err(err) = socket.set_reuse_port(true) {
                warn!(%err, "SO_REUSEPORT unavailable, acceptors share one queue");
            }
            #[cfg(not(unix))]
            warn!("SO_REUSEPORT not supported on this platform");
        }

        socket
            .bind(&self.config.listen_addr.into())
            .map_err(|e| ServerError::Network(format!("bind failed: {e}")))?;
        socket
            .listen(65535)
            .map_err(|e| ServerError::Network(format!("listen failed: {e}")))?;

        let std_listener: StdTcpListener = socket.into();
        std_listener.set_nonblocking(true).ok();
        TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::Network(format!("listener registration failed: {e}")))
    }

    async fn accept_loop(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    stream.set_nodelay(true).ok();
                    let id = self.conn_ids.allocate();
                    Connection::spawn(
                        stream,
                        id,
                        addr.to_string(),
                        &self.gateway,
                        Arc::clone(&self.login),
                        Arc::clone(&self.router) as Arc<dyn Router>,
                        self.config.connection_expiration,
                    );
                }
                Err(err) => {
                    // Per-connection accept errors do not take the listener
                    // down; keep serving.
                    error!(%err, "accept failed");
                }
            }
        }
    }

    /// Ask the server to stop serving.
    pub fn shutdown(&self) {
        let _ = self.shutdown_sender.send(());
    }

    fn cleanup(&self) {
        info!("stopping gateway and services");
        self.gateway.shutdown();
        self.registry.shutdown_all();
        info!("server stopped");
    }
}

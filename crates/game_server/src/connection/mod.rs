//! Per-socket connection handling.
//!
//! Each accepted socket gets one [`Connection`] running three concurrent
//! loops — read, write and watchdog — joined with first-to-finish-wins
//! semantics: whichever loop ends tears the whole connection down. Before
//! login the read loop feeds packets to the login component under an
//! anti-spam gate; after login it stamps the watchdog and routes packets
//! to the bound player agent or onward to services. Disconnection is
//! idempotent and cascades through the watchdog, the socket, the outbound
//! channel and the gateway binding, in that order.

use crate::gateway::{Gateway, PlayerAgent};
use crate::login::LoginAuth;
use actor_system::{
    codec, PacketHandle, PacketPool, PlayerId, PoolConfig, Router, CLIENT_TARGET_ID,
    HEARTBEAT_PACKAGE_ID, LOGIN_FAILED_PACKAGE_ID, LOGIN_REPEATED_PACKAGE_ID,
    LOGIN_REQUEST_PACKAGE_ID, LOGIN_RESPONSE_PACKAGE_ID, LOGOUT_REQUEST_PACKAGE_ID,
    PLATFORM_PACKAGE_ID, PLAYER_TARGET_ID, SERVER_SOURCE_ID,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Minimum spacing between counted login attempts.
pub const LOGIN_ATTEMPT_GATE: Duration = Duration::from_secs(3);

/// Counted attempts allowed before the connection is closed.
pub const MAX_LOGIN_ATTEMPTS: u32 = 3;

const OUTBOUND_CHANNEL_CAPACITY: usize = 1024;
const CONNECTION_POOL_CAPACITY: usize = 32;

/// Login progression of one connection.
///
/// The two concerns the original conflated into one signed counter — "not
/// yet logged in" and "how many attempts" — are explicit here.
#[derive(Debug, Clone, Copy)]
pub enum LoginState {
    NotLoggedIn {
        attempts: u32,
        last_counted: Option<Instant>,
    },
    LoggedIn(PlayerId),
}

enum PreLoginAction {
    /// Hand the packet to the login component.
    Forward,
    /// Inside the 3-second gate; drop the packet silently.
    Ignore,
    /// Attempt limit crossed; close the connection.
    Overflow,
}

/// One client socket and its pump state.
pub struct Connection {
    id: i64,
    key: String,
    remote: String,
    outbound: mpsc::Sender<PacketHandle>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
    last_receive: Mutex<Instant>,
    expiration: Duration,
    login: Mutex<LoginState>,
    agent: RwLock<Option<Arc<PlayerAgent>>>,
    pool: PacketPool,
    gateway: Weak<Gateway>,
    login_auth: Arc<LoginAuth>,
    router: Arc<dyn Router>,
}

impl Connection {
    /// Register a fresh connection and start its pump loops.
    pub fn spawn<S>(
        stream: S,
        id: i64,
        remote: String,
        gateway: &Arc<Gateway>,
        login_auth: Arc<LoginAuth>,
        router: Arc<dyn Router>,
        expiration: Duration,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pool = PacketPool::new(PoolConfig::default());
        // The pool is freshly constructed; initial() cannot have run yet.
        let _ = pool.initial(CONNECTION_POOL_CAPACITY);

        let conn = Arc::new(Self {
            id,
            key: Uuid::new_v4().to_string(),
            remote,
            outbound: outbound_tx,
            shutdown: shutdown_tx,
            closed: AtomicBool::new(false),
            last_receive: Mutex::new(Instant::now()),
            expiration,
            login: Mutex::new(LoginState::NotLoggedIn {
                attempts: 0,
                last_counted: None,
            }),
            agent: RwLock::new(None),
            pool,
            gateway: Arc::downgrade(gateway),
            login_auth,
            router,
        });

        gateway.register_connecting(&conn);
        info!(conn = id, remote = %conn.remote, "client connected");

        let pumps = Arc::clone(&conn);
        tokio::spawn(async move {
            let (read_half, write_half) = tokio::io::split(stream);
            tokio::select! {
                _ = Arc::clone(&pumps).read_pump(read_half) => {}
                _ = Arc::clone(&pumps).write_pump(write_half, outbound_rx) => {}
                _ = Arc::clone(&pumps).watchdog() => {}
                _ = wait_for_shutdown(shutdown_rx) => {}
            }
            pumps.teardown();
        });

        conn
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Ephemeral key identifying this connection before login.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        match *self.login.lock() {
            LoginState::LoggedIn(pid) => Some(pid),
            LoginState::NotLoggedIn { .. } => None,
        }
    }

    /// Request teardown. Safe to call any number of times, from anywhere.
    pub fn disconnect(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Attach the logged-in player agent to this socket.
    pub fn bind_agent(&self, agent: &Arc<PlayerAgent>, pid: PlayerId) {
        *self.login.lock() = LoginState::LoggedIn(pid);
        *self.agent.write() = Some(Arc::clone(agent));
        *self.last_receive.lock() = Instant::now();
    }

    /// Queue a packet for the write loop. Fire-and-forget: a full channel
    /// falls back to a spawned send, a closed one drops the packet.
    pub fn send_package(&self, pkg: PacketHandle) {
        if self.is_closed() {
            return;
        }
        match self.outbound.try_send(pkg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(pkg)) => {
                let outbound = self.outbound.clone();
                tokio::spawn(async move {
                    let _ = outbound.send(pkg).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Tell the client its login was rejected; the write loop disconnects
    /// after flushing this packet.
    pub fn send_login_failed(&self, reason: &str) {
        if let Ok(mut pkg) = self.pool.acquire() {
            if let Some(p) = pkg.get_mut() {
                p.set_id(LOGIN_FAILED_PACKAGE_ID)
                    .set_source(SERVER_SOURCE_ID)
                    .set_target(CLIENT_TARGET_ID)
                    .set_text(reason);
            }
            self.send_package(pkg);
        } else {
            self.disconnect();
        }
    }

    /// Tell the client its identity logged in elsewhere; the write loop
    /// disconnects after flushing this packet.
    pub fn send_login_repeated(&self, addr: &str) {
        if let Ok(mut pkg) = self.pool.acquire() {
            if let Some(p) = pkg.get_mut() {
                p.set_id(LOGIN_REPEATED_PACKAGE_ID)
                    .set_source(SERVER_SOURCE_ID)
                    .set_target(CLIENT_TARGET_ID)
                    .set_text(addr);
            }
            self.send_package(pkg);
        } else {
            self.disconnect();
        }
    }

    async fn read_pump<R>(self: Arc<Self>, mut stream: R)
    where
        R: AsyncRead + Send + Unpin,
    {
        loop {
            let mut pkg = match self.pool.acquire() {
                Ok(pkg) => pkg,
                Err(_) => return,
            };
            let decoded = match pkg.get_mut() {
                Some(slot) => codec::decode(&mut stream, slot).await,
                None => return,
            };
            if let Err(err) = decoded {
                // Framing violations and stream errors are both fatal here;
                // a desynced stream cannot be recovered.
                debug!(conn = self.id, %err, "read loop ending");
                return;
            }

            *self.last_receive.lock() = Instant::now();

            let logged_in = match *self.login.lock() {
                LoginState::LoggedIn(pid) => Some(pid),
                LoginState::NotLoggedIn { .. } => None,
            };

            match logged_in {
                None => match self.note_login_attempt() {
                    PreLoginAction::Forward => {
                        self.login_auth.on_login_request(&self, &pkg).await;
                    }
                    PreLoginAction::Ignore => {}
                    PreLoginAction::Overflow => {
                        warn!(conn = self.id, remote = %self.remote, "too many login attempts");
                        return;
                    }
                },
                Some(pid) => {
                    if !self.handle_package(pid, pkg).await {
                        return;
                    }
                }
            }
        }
    }

    /// Count one pre-login packet against the attempt budget.
    fn note_login_attempt(&self) -> PreLoginAction {
        let mut login = self.login.lock();
        let LoginState::NotLoggedIn {
            attempts,
            last_counted,
        } = &mut *login
        else {
            return PreLoginAction::Ignore;
        };

        let now = Instant::now();
        let gate_open = last_counted
            .map_or(true, |at| now.duration_since(at) >= LOGIN_ATTEMPT_GATE);
        if !gate_open {
            return PreLoginAction::Ignore;
        }

        *attempts += 1;
        *last_counted = Some(now);
        if *attempts > MAX_LOGIN_ATTEMPTS {
            PreLoginAction::Overflow
        } else {
            PreLoginAction::Forward
        }
    }

    /// Route one post-login packet. Returns false to end the read loop.
    async fn handle_package(&self, pid: PlayerId, mut pkg: PacketHandle) -> bool {
        match pkg.id() {
            HEARTBEAT_PACKAGE_ID | LOGIN_REQUEST_PACKAGE_ID | LOGIN_RESPONSE_PACKAGE_ID => true,
            PLATFORM_PACKAGE_ID => {
                self.login_auth.on_platform_info(pid, &pkg);
                true
            }
            LOGOUT_REQUEST_PACKAGE_ID => {
                info!(conn = self.id, player = pid, "logout requested");
                if let Some(agent) = self.agent.read().as_ref() {
                    // An explicit logout opts out of disconnect caching.
                    agent.set_cachable(false);
                }
                false
            }
            _ => {
                let target = pkg.target();
                if target == PLAYER_TARGET_ID {
                    let agent = self.agent.read().clone();
                    if let Some(agent) = agent {
                        if agent.push_package(pkg).await.is_err() {
                            return false;
                        }
                    }
                } else if target > 0 {
                    if let Some(p) = pkg.get_mut() {
                        p.set_source(PLAYER_TARGET_ID);
                    }
                    self.router.post_package(PLAYER_TARGET_ID, pkg);
                }
                // Non-positive targets other than the player sentinel are
                // addressing noise; drop them.
                true
            }
        }
    }

    async fn write_pump<W>(self: Arc<Self>, mut stream: W, mut rx: mpsc::Receiver<PacketHandle>)
    where
        W: AsyncWrite + Send + Unpin,
    {
        while let Some(pkg) = rx.recv().await {
            if let Err(err) = codec::encode(&mut stream, &pkg).await {
                warn!(conn = self.id, %err, "write failed");
                return;
            }

            // Terminal notifications: flush, then drop the connection.
            if matches!(
                pkg.id(),
                LOGIN_FAILED_PACKAGE_ID | LOGIN_REPEATED_PACKAGE_ID
            ) {
                debug!(conn = self.id, "terminal package flushed");
                return;
            }
        }
    }

    /// Force-disconnect once the connection has been idle past expiration.
    ///
    /// Re-armed against `last_receive` each pass; a fire is re-checked
    /// against the clock so a stale timer never kills a live connection.
    async fn watchdog(self: Arc<Self>) {
        if self.expiration.is_zero() {
            std::future::pending::<()>().await;
            return;
        }

        loop {
            let deadline = *self.last_receive.lock() + self.expiration;
            tokio::time::sleep_until(deadline.into()).await;

            let now = Instant::now();
            if now >= *self.last_receive.lock() + self.expiration {
                warn!(conn = self.id, remote = %self.remote, "watchdog expired");
                return;
            }
            // Activity arrived while we slept; re-arm.
        }
    }

    /// Cascade teardown. Runs exactly once no matter how many loops end or
    /// how many times `disconnect` fires.
    fn teardown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.send(true);

        if let Some(gateway) = self.gateway.upgrade() {
            gateway.on_connection_closed(self);
        }
        if let Some(agent) = self.agent.write().take() {
            agent.detach_connection();
            agent.request_shutdown();
        }
        info!(conn = self.id, remote = %self.remote, "client disconnected");
    }
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayConfig, PlayerFactory};
    use crate::login::{JsonLoginHandler, LoginAuth};
    use actor_system::{EventBus, NullRouter, Packet, Recyclable};
    use tokio::io::AsyncReadExt;

    fn stack() -> (Arc<Gateway>, Arc<LoginAuth>) {
        let gateway = Gateway::new(
            PlayerFactory::basic(),
            Arc::new(EventBus::new()),
            GatewayConfig::default(),
        );
        let login = LoginAuth::new(Box::new(JsonLoginHandler), &gateway);
        (gateway, login)
    }

    fn spawn_test_connection(
        gateway: &Arc<Gateway>,
        login: Arc<LoginAuth>,
    ) -> (Arc<Connection>, tokio::io::DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let conn = Connection::spawn(
            server,
            1,
            "10.1.1.1:6000".to_string(),
            gateway,
            login,
            Arc::new(NullRouter),
            Duration::ZERO,
        );
        (conn, client)
    }

    async fn send_malformed_login(client: &mut tokio::io::DuplexStream) {
        let mut pkg = Packet::default();
        pkg.initial();
        pkg.set_id(actor_system::LOGIN_REQUEST_PACKAGE_ID)
            .set_payload(b"definitely not json");
        actor_system::codec::encode(client, &pkg)
            .await
            .expect("client encode");
    }

    fn counted_attempts(conn: &Connection) -> u32 {
        match *conn.login.lock() {
            LoginState::NotLoggedIn { attempts, .. } => attempts,
            LoginState::LoggedIn(_) => 0,
        }
    }

    /// Reopen the 3-second gate without waiting it out.
    fn backdate_gate(conn: &Connection) {
        let mut state = conn.login.lock();
        if let LoginState::NotLoggedIn { last_counted, .. } = &mut *state {
            *last_counted = Some(Instant::now() - LOGIN_ATTEMPT_GATE);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rapid_attempts_inside_gate_are_not_counted() {
        let (gateway, login) = stack();
        let (conn, mut client) = spawn_test_connection(&gateway, login);

        send_malformed_login(&mut client).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counted_attempts(&conn), 1);

        // Two more inside the gate window: parsed, dropped, not counted.
        send_malformed_login(&mut client).await;
        send_malformed_login(&mut client).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counted_attempts(&conn), 1);
        assert!(!conn.is_closed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fourth_counted_attempt_disconnects() {
        let (gateway, login) = stack();
        let (conn, mut client) = spawn_test_connection(&gateway, login);

        for expected in 1..=3u32 {
            send_malformed_login(&mut client).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(counted_attempts(&conn), expected);
            assert!(!conn.is_closed(), "attempt {expected} must not close");
            backdate_gate(&conn);
        }

        // The fourth counted attempt crosses the limit.
        send_malformed_login(&mut client).await;
        let mut buf = [0u8; 8];
        let read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .expect("disconnect in time")
            .expect("read");
        assert_eq!(read, 0, "expected EOF after attempt overflow");
        assert!(conn.is_closed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn disconnect_is_idempotent() {
        let (gateway, login) = stack();
        let (conn, _client) = spawn_test_connection(&gateway, login);

        conn.disconnect();
        conn.disconnect();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(conn.is_closed());
        conn.disconnect();
    }
}

//! Login authentication.
//!
//! The wire-level rate limiting lives in the connection; this component
//! owns credential parsing and the decision to promote a connection to a
//! player session. The actual credential check against an account backend
//! is pluggable through [`LoginHandler`]; the built-in handler accepts a
//! JSON payload carrying a token and player id, which is what the
//! development client sends.

use crate::connection::Connection;
use crate::gateway::Gateway;
use actor_system::{Packet, PacketHandle, PlayerId};
use serde::Deserialize;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Parsed login credentials.
#[derive(Debug, Clone)]
pub struct LoginToken {
    pub token: String,
    pub player_id: PlayerId,
}

/// Parsed client platform report.
#[derive(Debug, Clone, Default)]
pub struct PlatformInfo {
    pub platform: String,
    pub device: String,
}

/// Credential parsing, pluggable per deployment.
pub trait LoginHandler: Send + Sync {
    /// Extract credentials from a login request package.
    fn parse_login(&self, pkg: &Packet) -> Option<LoginToken>;

    /// Extract the platform report a client sends after login.
    fn parse_platform(&self, pkg: &Packet) -> Option<PlatformInfo>;
}

/// Built-in handler for the JSON development protocol.
#[derive(Default)]
pub struct JsonLoginHandler;

#[derive(Deserialize)]
struct LoginPayload {
    token: String,
    player_id: PlayerId,
}

#[derive(Deserialize)]
struct PlatformPayload {
    #[serde(default)]
    platform: String,
    #[serde(default)]
    device: String,
}

impl LoginHandler for JsonLoginHandler {
    fn parse_login(&self, pkg: &Packet) -> Option<LoginToken> {
        let payload: LoginPayload = serde_json::from_slice(pkg.payload()).ok()?;
        Some(LoginToken {
            token: payload.token,
            player_id: payload.player_id,
        })
    }

    fn parse_platform(&self, pkg: &Packet) -> Option<PlatformInfo> {
        let payload: PlatformPayload = serde_json::from_slice(pkg.payload()).ok()?;
        Some(PlatformInfo {
            platform: payload.platform,
            device: payload.device,
        })
    }
}

/// The login component: parses, verifies and promotes.
pub struct LoginAuth {
    handler: Box<dyn LoginHandler>,
    gateway: Weak<Gateway>,
}

impl LoginAuth {
    pub fn new(handler: Box<dyn LoginHandler>, gateway: &Arc<Gateway>) -> Arc<Self> {
        Arc::new(Self {
            handler,
            gateway: Arc::downgrade(gateway),
        })
    }

    /// Handle one pre-login package from `conn`.
    ///
    /// Invalid credentials produce a login-failed package (the write loop
    /// closes the socket after flushing it); valid ones hand the session
    /// to the gateway.
    pub async fn on_login_request(&self, conn: &Arc<Connection>, pkg: &PacketHandle) {
        // Unparseable requests are dropped, not answered: the connection's
        // attempt limiter decides when enough is enough.
        let Some(token) = self.handler.parse_login(pkg) else {
            debug!(conn = conn.id(), "unparseable login request dropped");
            return;
        };

        if token.token.is_empty() || token.player_id <= 0 {
            warn!(conn = conn.id(), player = token.player_id, "login rejected");
            conn.send_login_failed("invalid credentials");
            return;
        }

        let Some(gateway) = self.gateway.upgrade() else {
            conn.disconnect();
            return;
        };

        if let Err(err) = gateway.on_player_login(conn.key(), token.player_id).await {
            warn!(conn = conn.id(), player = token.player_id, %err, "login failed");
            conn.send_login_failed(&err.to_string());
        }
    }

    /// Record a post-login platform report.
    pub fn on_platform_info(&self, pid: PlayerId, pkg: &PacketHandle) {
        if let Some(report) = self.handler.parse_platform(pkg) {
            info!(
                player = pid,
                platform = report.platform,
                device = report.device,
                "platform report"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actor_system::{PacketPool, PoolConfig};

    fn packet_with(payload: &[u8]) -> actor_system::PacketHandle {
        let pool = PacketPool::new(PoolConfig::default());
        pool.initial(2).expect("initial");
        let mut pkg = pool.acquire().expect("acquire");
        pkg.get_mut()
            .expect("unique")
            .set_id(actor_system::LOGIN_REQUEST_PACKAGE_ID)
            .set_payload(payload);
        pkg
    }

    #[test]
    fn json_handler_parses_valid_login() {
        let handler = JsonLoginHandler;
        let pkg = packet_with(br#"{"token":"abc123","player_id":42}"#);
        let token = handler.parse_login(&pkg).expect("parse");
        assert_eq!(token.token, "abc123");
        assert_eq!(token.player_id, 42);
    }

    #[test]
    fn json_handler_rejects_garbage() {
        let handler = JsonLoginHandler;
        let pkg = packet_with(b"not json at all");
        assert!(handler.parse_login(&pkg).is_none());
    }

    #[test]
    fn json_handler_parses_platform_defaults() {
        let handler = JsonLoginHandler;
        let pkg = packet_with(br#"{"platform":"linux"}"#);
        let info = handler.parse_platform(&pkg).expect("parse");
        assert_eq!(info.platform, "linux");
        assert_eq!(info.device, "");
    }
}

//! # Game Server - Infrastructure Core
//!
//! The serving layer of the Meridian runtime. This crate contains **no
//! game logic** — it provides the infrastructure that hosts it:
//!
//! * **Connection handling** - framed-packet pumps, login gating and idle
//!   watchdogs per socket
//! * **Gateway** - player session lifecycle: login, logout, duplicate-login
//!   takeover and the disconnected-player grace cache
//! * **Routing** - destination resolution for service- and player-bound
//!   traffic, always delivered through agent channels
//! * **Persistence queue** - asynchronous storage task submission with
//!   callback completion
//! * **Orchestration** - multi-acceptor listeners and ordered shutdown
//!
//! Game behavior lives in service and player modules loaded through
//! `service_system` and driven entirely by the actor core's channel
//! discipline.

pub mod config;
pub mod connection;
pub mod data;
pub mod error;
pub mod gateway;
pub mod login;
pub mod router;
pub mod server;

pub use config::GameServerConfig;
pub use connection::{Connection, LoginState, LOGIN_ATTEMPT_GATE, MAX_LOGIN_ATTEMPTS};
pub use data::{DataAccess, DatabaseTask, TaskCallback, TaskOutcome};
pub use error::ServerError;
pub use gateway::{BasicPlayer, Gateway, GatewayConfig, PlayerAgent, PlayerCache, PlayerFactory};
pub use login::{JsonLoginHandler, LoginAuth, LoginHandler, LoginToken, PlatformInfo};
pub use router::MessageRouter;
pub use server::GameServer;

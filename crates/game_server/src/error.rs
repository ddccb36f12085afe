//! Server-level error types.

use actor_system::{ActorError, FramingError, PlayerId};
use service_system::ServiceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket, bind or protocol failure.
    #[error("network error: {0}")]
    Network(String),

    /// Wire framing violation; fatal to the connection that produced it.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// Login was rejected.
    #[error("login failed: {0}")]
    LoginRejected(String),

    /// No live agent for this player.
    #[error("player {0} is not online")]
    PlayerNotFound(PlayerId),

    /// No connection under this key.
    #[error("connection {0} is not registered")]
    ConnectionNotFound(String),

    /// Service subsystem failure.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Actor core failure.
    #[error(transparent)]
    Actor(#[from] ActorError),

    /// Anything else contained to the server.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Network(err.to_string())
    }
}

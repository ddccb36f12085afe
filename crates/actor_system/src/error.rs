//! Error types for the actor core.

use crate::agent::AgentState;
use thiserror::Error;

/// Errors surfaced by pools, agents, timers and the event bus.
///
/// Lifecycle violations (`InvalidState`, `AlreadyInitialized`) indicate a
/// caller bug and are never swallowed; environmental conditions such as a
/// closed channel are reported so the caller can stop producing.
#[derive(Debug, Error)]
pub enum ActorError {
    /// A one-shot initialization entry point was invoked twice.
    #[error("already initialized")]
    AlreadyInitialized,

    /// The pool has not been populated with `initial()` yet.
    #[error("pool not initialized")]
    NotInitialized,

    /// An operation was attempted while the agent was in the wrong state.
    #[error("invalid agent state: {0:?}")]
    InvalidState(AgentState),

    /// The agent's channel is closed; the node was not delivered.
    #[error("agent channel closed")]
    ChannelClosed,

    /// A framing violation on the wire. Fatal to the connection.
    #[error(transparent)]
    Framing(#[from] FramingError),
}

/// Wire framing violations.
///
/// Framing desync cannot be resynchronized, so every variant is fatal to
/// the connection that produced it.
#[derive(Debug, Error)]
pub enum FramingError {
    /// The header's magic field did not match the protocol constant.
    #[error("bad magic: {found:#010x}")]
    BadMagic { found: u32 },

    /// The declared payload length exceeds the 4 MiB cap.
    #[error("payload length {length} exceeds maximum")]
    OversizePayload { length: u64 },

    /// The underlying stream failed or ended mid-frame.
    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),
}

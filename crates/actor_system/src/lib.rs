//! # Actor System - Concurrency Core
//!
//! The foundation of the Meridian game server: a pooled-message actor
//! runtime multiplexing many independent agents over a small pool of
//! runtime workers.
//!
//! ## Architecture
//!
//! * **Recycler pools** - zero-steady-state-allocation message buffers with
//!   reference-counted handles ([`recycler`], [`packet`])
//! * **Agent mailboxes** - one bounded channel and one drain task per
//!   actor, giving per-actor serialization without per-actor locks
//!   ([`agent`])
//! * **Timers and events** - all delivered *through* the owning agent's
//!   channel, never invoked inline ([`timer`], [`event`])
//! * **Wire codec** - big-endian framed packets over any async byte stream
//!   ([`codec`])
//!
//! ## The concurrency contract
//!
//! An actor's callbacks never overlap: each agent has exactly one consumer
//! task draining its channel sequentially. Different agents execute in
//! parallel across the runtime's worker threads. Everything that wants an
//! actor's attention — socket bytes, timers, cross-actor calls, events —
//! becomes a schedule node in that actor's channel.
//!
//! ## Loadable modules
//!
//! Game logic lives in dynamically loaded modules exposing a C-linkage
//! create/destroy symbol pair. [`export_service!`] and [`export_player!`]
//! generate those exports, panic-isolated, for a type implementing
//! [`Service`] or [`Player`].

pub mod actor;
pub mod agent;
pub mod codec;
pub mod error;
pub mod event;
pub mod handle;
pub mod ident;
pub mod packet;
pub mod recycler;
pub mod timer;
pub mod types;

pub use actor::{
    Actor, ActorHost, ActorKind, NullRouter, Player, PlayerTask, Router, Service, ServiceTask,
};
pub use agent::{
    agent_channel, run_agent, AgentChannel, AgentReceiver, AgentShared, AgentState, Chore, Mailbox,
    ScheduleNode, AGENT_CHANNEL_CAPACITY,
};
pub use error::{ActorError, FramingError};
pub use event::{AgentHandle, EventBus, EventParam};
pub use handle::Handle;
pub use ident::{IdentAllocator, SyncIdentAllocator};
pub use packet::{
    Packet, PacketHandle, PacketHeader, PacketPool, MAX_PAYLOAD_SIZE, PACKET_HEADER_SIZE,
    PACKET_MAGIC,
};
pub use recycler::{PoolConfig, Recyclable, RecycleHandle, Recycler};
pub use timer::{Timer, TimerHandle, TimerManager, TimerTask};
pub use types::*;

/// Creation symbol exported by a service module.
pub const CREATE_SERVICE_SYMBOL: &[u8] = b"create_service";

/// Destruction symbol exported by a service module.
pub const DESTROY_SERVICE_SYMBOL: &[u8] = b"destroy_service";

/// Creation symbol exported by a player module.
pub const CREATE_PLAYER_SYMBOL: &[u8] = b"create_player";

/// Destruction symbol exported by a player module.
pub const DESTROY_PLAYER_SYMBOL: &[u8] = b"destroy_player";

/// Signature of `create_service`.
pub type CreateServiceFn = unsafe extern "C" fn() -> *mut dyn Service;

/// Signature of `destroy_service`.
pub type DestroyServiceFn = unsafe extern "C" fn(*mut dyn Service);

/// Signature of `create_player`.
pub type CreatePlayerFn = unsafe extern "C" fn() -> *mut dyn Player;

/// Signature of `destroy_player`.
pub type DestroyPlayerFn = unsafe extern "C" fn(*mut dyn Player);

/// Generate the `create_service`/`destroy_service` exports for a service
/// type.
///
/// The type must provide a `fn new() -> Self`. Both exports catch panics at
/// the FFI boundary: creation returns null instead of unwinding into the
/// host, destruction swallows the panic (a leak beats a crash).
///
/// ```ignore
/// struct ArenaService { /* ... */ }
///
/// impl ArenaService {
///     fn new() -> Self { /* ... */ }
/// }
///
/// impl Service for ArenaService { /* ... */ }
///
/// export_service!(ArenaService);
/// ```
#[macro_export]
macro_rules! export_service {
    ($service_type:ty) => {
        /// Service creation entry point; called by the host's loader.
        #[no_mangle]
        pub unsafe extern "C" fn create_service() -> *mut dyn $crate::Service {
            match ::std::panic::catch_unwind(|| {
                let service: ::std::boxed::Box<dyn $crate::Service> =
                    ::std::boxed::Box::new(<$service_type>::new());
                ::std::boxed::Box::into_raw(service)
            }) {
                Ok(ptr) => ptr,
                Err(_) => {
                    ::std::eprintln!("create_service panicked");
                    ::std::ptr::null_mut::<$service_type>() as *mut dyn $crate::Service
                }
            }
        }

        /// Service destruction entry point; called by the host's loader.
        #[no_mangle]
        pub unsafe extern "C" fn destroy_service(service: *mut dyn $crate::Service) {
            if service.is_null() {
                return;
            }
            let _ = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| {
                drop(::std::boxed::Box::from_raw(service));
            }));
        }
    };
}

/// Generate the `create_player`/`destroy_player` exports for a player type.
///
/// Mirrors [`export_service!`]; see its docs for the contract.
#[macro_export]
macro_rules! export_player {
    ($player_type:ty) => {
        /// Player creation entry point; called by the host's gateway.
        #[no_mangle]
        pub unsafe extern "C" fn create_player() -> *mut dyn $crate::Player {
            match ::std::panic::catch_unwind(|| {
                let player: ::std::boxed::Box<dyn $crate::Player> =
                    ::std::boxed::Box::new(<$player_type>::new());
                ::std::boxed::Box::into_raw(player)
            }) {
                Ok(ptr) => ptr,
                Err(_) => {
                    ::std::eprintln!("create_player panicked");
                    ::std::ptr::null_mut::<$player_type>() as *mut dyn $crate::Player
                }
            }
        }

        /// Player destruction entry point; called by the host's gateway.
        #[no_mangle]
        pub unsafe extern "C" fn destroy_player(player: *mut dyn $crate::Player) {
            if player.is_null() {
                return;
            }
            let _ = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| {
                drop(::std::boxed::Box::from_raw(player));
            }));
        }
    };
}

//! Core identifier types and protocol constants.
//!
//! Actor identifiers are signed on purpose: positive values address real
//! actors, while a small set of negative sentinels is reserved for implicit
//! addressing (the player agent itself, the connected client, the server
//! infrastructure). Sentinels are never allocated to a live actor.

/// Identifier of a player actor. Positive for logged-in players.
pub type PlayerId = i64;

/// Identifier of a service actor. Positive for running services.
pub type ServiceId = i32;

/// Identifier of a timer owned by an agent.
pub type TimerId = i64;

/// Addressing sentinel: the package targets the player agent itself.
pub const PLAYER_TARGET_ID: i32 = -1;

/// Addressing sentinel: the package targets the connected client.
pub const CLIENT_TARGET_ID: i32 = -2;

/// Addressing sentinel: the package originates from server infrastructure.
pub const SERVER_SOURCE_ID: i32 = -3;

/// Sentinel for a service identifier that has been invalidated.
pub const INVALID_SERVICE_ID: i32 = -10;

/// Smallest package type identifier usable by application traffic.
pub const MINIMUM_PACKAGE_ID: u32 = 1001;

/// Largest package type identifier usable by application traffic.
pub const MAXIMUM_PACKAGE_ID: u32 = 999_999;

/// Header-only keep-alive sent periodically by clients.
pub const HEARTBEAT_PACKAGE_ID: u32 = 1001;

/// Client request carrying login credentials.
pub const LOGIN_REQUEST_PACKAGE_ID: u32 = 1002;

/// Server response confirming a successful login.
pub const LOGIN_RESPONSE_PACKAGE_ID: u32 = 1003;

/// Server notification that the identity logged in elsewhere.
pub const LOGIN_REPEATED_PACKAGE_ID: u32 = 1004;

/// Client platform/device information.
pub const PLATFORM_PACKAGE_ID: u32 = 1005;

/// Client request to log out; disables disconnect caching.
pub const LOGOUT_REQUEST_PACKAGE_ID: u32 = 1006;

/// Server notification that login was rejected.
pub const LOGIN_FAILED_PACKAGE_ID: u32 = 1007;

/// Returns true when `id` addresses a real (allocated) actor.
pub fn is_real_actor_id(id: i32) -> bool {
    id > 0
}

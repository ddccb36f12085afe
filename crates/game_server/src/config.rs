//! Runtime configuration of the game server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Everything the server core needs to run.
///
/// The binary builds this from its TOML file and CLI overrides; tests build
/// it directly.
#[derive(Debug, Clone)]
pub struct GameServerConfig {
    /// Address the listener binds to.
    pub listen_addr: SocketAddr,

    /// Number of SO_REUSEPORT accept loops; 1 disables reuse-port.
    pub accept_loops: usize,

    /// Idle watchdog expiration per connection; zero disables the watchdog.
    pub connection_expiration: Duration,

    /// Directory of mandatory service modules.
    pub core_service_dir: PathBuf,

    /// Directory of optional extension modules.
    pub extend_service_dir: PathBuf,

    /// Player actor module; `None` falls back to the built-in player.
    pub player_module: Option<PathBuf>,

    /// How long a disconnected player's actor survives for reconnection.
    pub cache_keep_alive: Duration,

    /// Upper bound on cached disconnected players.
    pub cache_max_size: usize,

    /// Cadence of the cache collection sweep.
    pub cache_collect_interval: Duration,

    /// Grace period before an agent shutdown is forced.
    pub agent_shutdown_timeout: Duration,

    /// Worker tasks serving the persistence queue.
    pub data_workers: usize,

    /// Cadence of the shared service update tick; zero disables it.
    pub service_tick_interval: Duration,
}

impl Default for GameServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7100".parse().unwrap_or_else(|_| {
                SocketAddr::from(([0, 0, 0, 0], 7100))
            }),
            accept_loops: 1,
            connection_expiration: Duration::from_secs(30),
            core_service_dir: PathBuf::from("service"),
            extend_service_dir: PathBuf::from("extend"),
            player_module: None,
            cache_keep_alive: Duration::from_secs(300),
            cache_max_size: 4096,
            cache_collect_interval: Duration::from_secs(30),
            agent_shutdown_timeout: Duration::from_secs(10),
            data_workers: 4,
            service_tick_interval: Duration::from_millis(50),
        }
    }
}

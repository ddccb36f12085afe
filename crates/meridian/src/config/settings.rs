//! Configuration file structures.
//!
//! Deserialized from TOML. Every section has serde defaults so a minimal
//! file (or none of the optional sections) still yields a runnable
//! development configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration object.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub services: ServiceSettings,
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub data: DataSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Core network and runtime settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ServerSettings {
    /// Address to bind, "IP:PORT".
    pub listen_addr: String,

    /// Runtime worker threads; 0 means one per CPU core.
    pub workers: usize,

    /// Parallel accept loops (SO_REUSEPORT); 1 disables reuse-port.
    pub accept_loops: usize,

    /// Idle disconnect timeout in seconds; 0 disables the watchdog.
    pub connection_expiration: u64,

    /// Service update tick in milliseconds; 0 disables the shared ticker.
    pub tick_interval: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7100".to_string(),
            workers: 0,
            accept_loops: 1,
            connection_expiration: 30,
            tick_interval: 50,
        }
    }
}

/// Service module locations.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ServiceSettings {
    /// Directory of mandatory service modules.
    pub core_directory: PathBuf,

    /// Directory of optional extension modules.
    pub extend_directory: PathBuf,

    /// Player actor module; empty uses the built-in player.
    #[serde(default)]
    pub player_module: Option<PathBuf>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            core_directory: PathBuf::from("service"),
            extend_directory: PathBuf::from("extend"),
            player_module: None,
        }
    }
}

/// Player cache and agent lifecycle settings, all in seconds/counts.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GatewaySettings {
    /// How long a disconnected player's state survives for reconnection.
    pub cache_keep_alive: u64,

    /// Maximum cached disconnected players.
    pub cache_max_size: usize,

    /// Cache collection sweep interval.
    pub cache_collect_interval: u64,

    /// Grace period before agent shutdown is forced.
    pub agent_shutdown_timeout: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            cache_keep_alive: 300,
            cache_max_size: 4096,
            cache_collect_interval: 30,
            agent_shutdown_timeout: 10,
        }
    }
}

/// Persistence queue settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DataSettings {
    /// Worker tasks serving the storage queue.
    pub workers: usize,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// Logging output settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LoggingSettings {
    /// "trace", "debug", "info", "warn" or "error".
    pub level: String,

    /// Structured JSON output instead of human-readable lines.
    pub json_format: bool,

    /// Log file directory; empty logs to stdout only.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            directory: None,
        }
    }
}

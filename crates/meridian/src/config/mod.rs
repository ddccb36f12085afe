//! Configuration loading: TOML file plus CLI overrides.

pub mod args;
pub mod settings;

pub use args::Args;
pub use settings::Settings;

use anyhow::{Context, Result};
use game_server::GameServerConfig;
use std::path::Path;
use std::time::Duration;

/// Read and parse the configuration file.
pub fn load_settings(path: &Path) -> Result<Settings> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    let settings: Settings =
        toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(settings)
}

/// Fold CLI overrides into the loaded settings and produce the server
/// configuration.
pub fn build_server_config(settings: &Settings, args: &Args) -> Result<GameServerConfig> {
    let listen_addr = args
        .listen
        .as_deref()
        .unwrap_or(&settings.server.listen_addr)
        .parse()
        .context("invalid listen address")?;

    let player_module = settings
        .services
        .player_module
        .as_ref()
        .filter(|path| !path.as_os_str().is_empty())
        .cloned();

    Ok(GameServerConfig {
        listen_addr,
        accept_loops: settings.server.accept_loops.max(1),
        connection_expiration: Duration::from_secs(settings.server.connection_expiration),
        core_service_dir: settings.services.core_directory.clone(),
        extend_service_dir: settings.services.extend_directory.clone(),
        player_module,
        cache_keep_alive: Duration::from_secs(settings.gateway.cache_keep_alive),
        cache_max_size: settings.gateway.cache_max_size,
        cache_collect_interval: Duration::from_secs(settings.gateway.cache_collect_interval),
        agent_shutdown_timeout: Duration::from_secs(settings.gateway.agent_shutdown_timeout),
        data_workers: settings.data.workers.max(1),
        service_tick_interval: Duration::from_millis(settings.server.tick_interval),
    })
}

/// Worker thread count for the runtime: explicit override, then the file,
/// then one per core.
pub fn worker_threads(settings: &Settings, args: &Args) -> usize {
    args.workers
        .filter(|w| *w > 0)
        .or_else(|| (settings.server.workers > 0).then_some(settings.server.workers))
        .unwrap_or_else(num_cpus::get)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_listen_override_wins() {
        let settings = Settings::default();
        let mut args = Args::default();
        args.listen = Some("127.0.0.1:9999".to_string());

        let config = build_server_config(&settings, &args).expect("build");
        assert_eq!(config.listen_addr.port(), 9999);
    }

    #[test]
    fn empty_player_module_means_builtin() {
        let mut settings = Settings::default();
        settings.services.player_module = Some(std::path::PathBuf::new());
        let config = build_server_config(&settings, &Args::default()).expect("build");
        assert!(config.player_module.is_none());
    }

    #[test]
    fn worker_threads_precedence() {
        let mut settings = Settings::default();
        settings.server.workers = 3;

        let mut args = Args::default();
        assert_eq!(worker_threads(&settings, &args), 3);

        args.workers = Some(8);
        assert_eq!(worker_threads(&settings, &args), 8);

        settings.server.workers = 0;
        args.workers = None;
        assert!(worker_threads(&settings, &args) >= 1);
    }

    #[test]
    fn missing_config_file_errors() {
        assert!(load_settings(Path::new("/nonexistent/meridian.toml")).is_err());
    }
}

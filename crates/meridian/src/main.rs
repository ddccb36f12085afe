//! Meridian game server - main entry point.
//!
//! Startup order: arguments, configuration, logging, runtime, server.
//! Unrecoverable startup failures exit with distinct codes so operators
//! can tell a missing config from a bind failure from a broken service
//! module without reading logs.

mod config;
mod logging;
mod shutdown;

use clap::Parser;
use config::Args;
use game_server::{GameServer, ServerError};
use service_system::ServiceError;
use std::process::ExitCode;
use tracing::{error, info};

/// Configuration file missing or unparseable.
const EXIT_CONFIG: u8 = 101;
/// Listener could not bind.
const EXIT_BIND: u8 = 102;
/// Core service directory missing.
const EXIT_SERVICE_DIR: u8 = 103;
/// A core service module failed to load or initialize.
const EXIT_SERVICE_LOAD: u8 = 104;

fn main() -> ExitCode {
    let args = Args::parse();

    let settings = match config::load_settings(&args.config) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("meridian: {err:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if let Err(err) = logging::setup_logging(&settings.logging, args.debug) {
        eprintln!("meridian: logging setup failed: {err:#}");
        return ExitCode::from(EXIT_CONFIG);
    }

    let server_config = match config::build_server_config(&settings, &args) {
        Ok(config) => config,
        Err(err) => {
            error!("invalid configuration: {err:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let workers = config::worker_threads(&settings, &args);
    info!("meridian {} starting", env!("CARGO_PKG_VERSION"));
    info!(workers, addr = %server_config.listen_addr, "runtime configuration");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "runtime construction failed");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match runtime.block_on(run(server_config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("fatal: {err}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

async fn run(config: game_server::GameServerConfig) -> Result<(), ServerError> {
    let server = GameServer::new(config)?;
    let shutdown_signal = shutdown::setup_shutdown_handler().await;

    let serving = server.start();
    tokio::pin!(serving);

    tokio::select! {
        result = &mut serving => result,
        _ = shutdown_signal => {
            server.shutdown();
            // Let the serving loop observe the signal and run its cleanup.
            let result = serving.await;
            info!("server shutdown complete");
            result
        }
    }
}

/// Map fatal startup failures to their operator-facing exit codes.
fn exit_code_for(err: &ServerError) -> u8 {
    match err {
        ServerError::Service(ServiceError::DirectoryMissing(_)) => EXIT_SERVICE_DIR,
        ServerError::Service(_) => EXIT_SERVICE_LOAD,
        ServerError::Network(_) => EXIT_BIND,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn exit_codes_distinguish_failures() {
        let dir_missing = ServerError::Service(ServiceError::DirectoryMissing(PathBuf::from(
            "/srv/meridian/service",
        )));
        assert_eq!(exit_code_for(&dir_missing), EXIT_SERVICE_DIR);

        let null = ServerError::Service(ServiceError::NullInstance);
        assert_eq!(exit_code_for(&null), EXIT_SERVICE_LOAD);

        let bind = ServerError::Network("bind failed".into());
        assert_eq!(exit_code_for(&bind), EXIT_BIND);

        let other = ServerError::Internal("anything".into());
        assert_eq!(exit_code_for(&other), 1);
    }
}

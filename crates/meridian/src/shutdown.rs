//! Graceful shutdown signal handling.

use tokio::sync::oneshot;
use tracing::info;

/// Resolve once a termination signal arrives.
///
/// Unix listens for SIGINT and SIGTERM; elsewhere Ctrl+C.
pub async fn setup_shutdown_handler() -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(sig) => sig,
                Err(_) => return,
            };
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sig) => sig,
                Err(_) => return,
            };

            tokio::select! {
                _ = sigint.recv() => info!("SIGINT received, shutting down"),
                _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl+C received, shutting down");
            }
        }

        let _ = tx.send(());
    });

    rx
}

//! Server lifecycle: Starting wires the subsystems and binds the listener,
//! Running owns the cancellation token until shutdown.

mod running;
mod starting;

use running::Running;
use starting::Starting;

use crate::errors::ServerError;
use crate::server::Server;

pub(super) struct StateMachine {}

impl StateMachine {
    pub(super) async fn start(self, server: Server) -> Result<(), ServerError> {
        let running = Starting {
            config: server.config,
        }
        .start()
        .await?;
        running.wait().await
    }
}

/// Resolves on SIGINT or SIGTERM.
pub(super) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install ctrl-c handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

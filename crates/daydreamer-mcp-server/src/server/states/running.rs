use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::errors::ServerError;
use crate::graph::GraphStore;
use crate::sse::SessionTable;

pub(super) struct Running {
    pub(super) cancellation_token: CancellationToken,
    pub(super) sessions: SessionTable,
    pub(super) graph: Arc<GraphStore>,
    pub(super) listen_address: SocketAddr,
}

impl Running {
    /// Block until a shutdown signal, then cancel every background task and
    /// close remaining sessions.
    pub(super) async fn wait(self) -> Result<(), ServerError> {
        info!(
            address = %self.listen_address,
            database = self.graph.is_connected().await,
            "gateway running"
        );

        super::shutdown_signal().await;

        let open_sessions = self.sessions.active_count();
        info!(open_sessions, "shutdown signal received, draining");
        self.cancellation_token.cancel();
        Ok(())
    }
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::Running;
use crate::embedding::{self, Embedder};
use crate::errors::ServerError;
use crate::graph::GraphStore;
use crate::runtime::Config;
use crate::server::gateway_router;

/// Idle window before an auto-unload drops the embedding model.
const EMBEDDER_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

pub(super) struct Starting {
    pub(super) config: Config,
}

impl Starting {
    pub(super) async fn start(self) -> Result<Running, ServerError> {
        self.config.validate_transport()?;

        // Initialization order matters: schema registry is static, then the
        // database, then the embedder stub (not loaded), then the HTTP
        // surface referencing all of them.
        let graph = Arc::new(GraphStore::new(self.config.database_settings()));
        graph.connect_lenient().await;

        let embedder = Arc::new(Embedder::new(&self.config.embedding_settings()));

        let (router, sessions) =
            gateway_router(&self.config, Arc::clone(&graph), Arc::clone(&embedder))?;

        let cancellation_token = CancellationToken::new();
        sessions.spawn_sweeper(cancellation_token.child_token());

        if self.config.enable_resource_monitoring {
            embedding::spawn_resource_monitor(cancellation_token.child_token());
        }

        if self.config.enable_auto_unload {
            spawn_auto_unload(Arc::clone(&embedder), cancellation_token.child_token());
        }

        let listen_address = self.config.bind_address();
        let listener = tokio::net::TcpListener::bind(listen_address).await?;
        info!(address = %listen_address, "starting MCP gateway in SSE mode");

        let serve_token = cancellation_token.clone();
        tokio::spawn(async move {
            let shutdown = async move {
                serve_token.cancelled().await;
                info!("gateway serve loop cancelled");
            };
            if let Err(e) = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown)
            .await
            {
                error!("gateway exited with error: {e:?}");
            }
        });

        Ok(Running {
            cancellation_token,
            sessions,
            graph,
            listen_address,
        })
    }
}

fn spawn_auto_unload(embedder: Arc<Embedder>, cancellation: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = ticker.tick() => {
                    embedder.unload_if_idle(EMBEDDER_IDLE_TIMEOUT).await;
                }
            }
        }
    });
}

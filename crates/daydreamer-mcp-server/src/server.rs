//! The gateway server: router assembly and the starting/running lifecycle.

use std::sync::Arc;

use axum::Router;
use axum::middleware::from_fn_with_state;
use bon::bon;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthConfig, authenticate};
use crate::embedding::Embedder;
use crate::errors::ServerError;
use crate::graph::GraphStore;
use crate::health::{self, HealthState};
use crate::mcp::Dispatcher;
use crate::oauth::OAuthServer;
use crate::runtime::Config;
use crate::sse::{self, SessionTable, SseState};
use crate::tools::ToolRegistry;

mod states;

use states::StateMachine;

/// A DayDreamer memory gateway.
pub struct Server {
    config: Config,
}

#[bon]
impl Server {
    #[builder]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn start(self) -> Result<(), ServerError> {
        StateMachine {}.start(self).await
    }
}

/// Assemble the full HTTP surface without binding a listener. The state
/// machine uses this at startup; integration tests drive it directly.
pub fn gateway_router(
    config: &Config,
    graph: Arc<GraphStore>,
    embedder: Arc<Embedder>,
) -> Result<(Router, SessionTable), ServerError> {
    let tools = Arc::new(ToolRegistry::new(
        Arc::clone(&graph),
        embedder,
        config.graphrag_settings(),
        config.schema_enforcement_strict,
    )?);
    let dispatcher = Arc::new(Dispatcher::new(tools, config.schema_enforcement_strict));
    let sessions = SessionTable::new(config.session_settings());

    let auth = Arc::new(AuthConfig::from_runtime(config)?);
    let protected = sse::routes(
        SseState {
            sessions: sessions.clone(),
            dispatcher,
        },
        config.max_body_bytes,
    )
    .layer(from_fn_with_state(auth, authenticate));

    let mut router = Router::new()
        .merge(health::routes(HealthState {
            graph,
            sessions: sessions.clone(),
        }))
        .merge(protected);

    let oauth_settings = config.oauth_settings()?;
    if oauth_settings.enabled {
        router = router.merge(Arc::new(OAuthServer::new(oauth_settings)).router());
    }

    if config.enable_cors {
        router = router.layer(config.cors_config().build_cors_layer()?);
    }

    let router = router.layer(
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            tracing::info_span!(
                "mcp_gateway",
                method = %request.method(),
                uri = %request.uri(),
                status_code = tracing::field::Empty,
            )
        }),
    );

    Ok((router, sessions))
}

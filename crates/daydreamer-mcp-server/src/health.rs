//! Liveness and diagnostics endpoints (public, unauthenticated).

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use serde_json::{Value, json};
use tracing::trace;

use crate::graph::GraphStore;
use crate::mcp::{PROTOCOL_VERSION, SERVER_NAME};
use crate::sse::SessionTable;

#[derive(Clone)]
pub struct HealthState {
    pub graph: Arc<GraphStore>,
    pub sessions: SessionTable,
}

pub fn routes(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_endpoint))
        .route("/", get(server_info))
        .with_state(state)
}

async fn health_endpoint(State(state): State<HealthState>) -> Json<Value> {
    let database = state.graph.ping().await;
    let active_sessions = state.sessions.active_count();
    trace!(database, active_sessions, "health check");

    Json(json!({
        "status": if database { "ok" } else { "degraded" },
        "database": database,
        "active_sessions": active_sessions,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn server_info(State(state): State<HealthState>) -> Json<Value> {
    Json(json!({
        "name": SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "transport": "sse",
        "protocolVersion": PROTOCOL_VERSION,
        "active_sessions": state.sessions.active_count(),
        "endpoints": {
            "sse": "/sse",
            "messages": "/messages?session_id=<id>",
            "health": "/health",
            "oauth_metadata": "/.well-known/oauth-authorization-server",
            "protected_resource": "/.well-known/oauth-protected-resource",
        },
    }))
}

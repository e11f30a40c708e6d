//! Shared harness: a full gateway router with a disconnected graph store and
//! a deterministic embedding backend, driven in-process through tower.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use daydreamer_mcp_server::embedding::Embedder;
use daydreamer_mcp_server::embedding::backend::EncoderBackend;
use daydreamer_mcp_server::graph::GraphStore;
use daydreamer_mcp_server::runtime::Config;
use daydreamer_mcp_server::server::gateway_router;
use daydreamer_mcp_server::sse::SessionTable;
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde_json::Value;

pub const TEST_JWT_SECRET: &str = "integration-test-secret";
pub const TEST_STATIC_BEARER: &str = "integration-legacy-bearer";

struct StubBackend;

impl EncoderBackend for StubBackend {
    fn encode(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, daydreamer_mcp_server::embedding::EmbeddingError> {
        Ok(texts.iter().map(|_| vec![0.5; 512]).collect())
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

pub fn test_config(require_authentication: bool) -> Config {
    let mut config = Config::default();
    config.require_authentication = require_authentication;
    config.oauth_jwt_secret = SecretString::from(TEST_JWT_SECRET.to_string());
    config.railway_bearer_token = SecretString::from(TEST_STATIC_BEARER.to_string());
    config
}

pub fn test_router(config: &Config) -> (Router, SessionTable) {
    let graph = Arc::new(GraphStore::new(config.database_settings()));
    let embedder = Arc::new(Embedder::with_loader(
        &config.embedding_settings(),
        Arc::new(|| Ok(Arc::new(StubBackend) as Arc<dyn EncoderBackend>)),
    ));
    gateway_router(config, graph, embedder).expect("router must assemble")
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

pub async fn response_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body is JSON")
}

/// Read the next SSE chunk from a streaming body as text.
pub async fn next_sse_chunk(body: &mut axum::body::BodyDataStream) -> Option<String> {
    use futures::StreamExt;
    body.next()
        .await
        .map(|chunk| String::from_utf8_lossy(&chunk.expect("chunk reads")).to_string())
}

//! Graph database access.
//!
//! A thin wrapper over the Bolt driver. The connection is optional: the
//! gateway boots without a reachable database, reports it through `/health`,
//! and surfaces `database_unavailable` on tool calls until `connect`
//! succeeds. Every round-trip is bounded by the configured timeout; the pool
//! inside the driver is the only place connections exist.

use std::time::Duration;

use neo4rs::{BoltType, Graph, Query};
use secrecy::ExposeSecret;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::errors::McpError;
use crate::runtime::DatabaseSettings;

pub struct GraphStore {
    settings: DatabaseSettings,
    graph: RwLock<Option<Graph>>,
}

impl GraphStore {
    /// A store with no live connection. `connect` attaches one.
    pub fn new(settings: DatabaseSettings) -> Self {
        Self {
            settings,
            graph: RwLock::new(None),
        }
    }

    pub async fn connect(&self) -> Result<(), McpError> {
        let graph = Graph::new(
            &self.settings.uri,
            &self.settings.username,
            self.settings.password.expose_secret(),
        )
        .await
        .map_err(|e| McpError::database(format!("connection failed: {e}")))?;

        info!(uri = %self.settings.uri, "connected to graph database");
        *self.graph.write().await = Some(graph);
        Ok(())
    }

    /// Connect, logging instead of failing; used at startup so a database
    /// outage does not keep the HTTP surface down.
    pub async fn connect_lenient(&self) {
        if let Err(e) = self.connect().await {
            warn!("graph database unreachable at startup: {}", e.message);
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.graph.read().await.is_some()
    }

    /// Liveness probe for `/health`.
    pub async fn ping(&self) -> bool {
        let Ok(graph) = self.handle().await else {
            return false;
        };
        let probe = tokio::time::timeout(
            Duration::from_secs(5),
            graph.run(neo4rs::query("RETURN 1")),
        )
        .await;
        matches!(probe, Ok(Ok(())))
    }

    async fn handle(&self) -> Result<Graph, McpError> {
        self.graph
            .read()
            .await
            .clone()
            .ok_or_else(McpError::database_unavailable)
    }

    /// Run a statement without consuming results.
    pub async fn run(&self, query: Query) -> Result<(), McpError> {
        let graph = self.handle().await?;
        self.bounded(graph.run(query)).await?
            .map_err(|e| McpError::database(e.to_string()))
    }

    /// Run a statement and collect all rows.
    pub async fn fetch(&self, query: Query) -> Result<Vec<neo4rs::Row>, McpError> {
        let graph = self.handle().await?;
        self.bounded(async move {
            let mut stream = graph.execute(query).await?;
            let mut rows = Vec::new();
            while let Some(row) = stream.next().await? {
                rows.push(row);
            }
            Ok::<_, neo4rs::Error>(rows)
        })
        .await?
        .map_err(|e| McpError::database(e.to_string()))
    }

    /// Run a batch of statements in a single transaction. Partial failures
    /// roll back; nothing is visible until commit.
    pub async fn run_in_transaction(&self, queries: Vec<Query>) -> Result<(), McpError> {
        let graph = self.handle().await?;
        self.bounded(async move {
            let mut txn = graph.start_txn().await?;
            if let Err(e) = txn.run_queries(queries).await {
                debug!("transaction failed, rolling back: {e}");
                let _ = txn.rollback().await;
                return Err(e);
            }
            txn.commit().await
        })
        .await?
        .map_err(|e| McpError::database(e.to_string()))
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = T>,
    ) -> Result<T, McpError> {
        tokio::time::timeout(self.settings.timeout, fut)
            .await
            .map_err(|_| {
                McpError::timeout(format!(
                    "graph query exceeded {}s",
                    self.settings.timeout.as_secs()
                ))
            })
    }
}

/// Bolt has no f32 list type; vectors travel as 64-bit floats.
pub fn vector_param(vector: &[f32]) -> Vec<f64> {
    vector.iter().map(|v| f64::from(*v)).collect()
}

/// Convert a JSON parameter map into Bolt values for `raw_cypher_query`.
/// Scalars and flat scalar lists only; anything else must be restructured by
/// the caller.
pub fn bind_json_params(mut query: Query, params: &serde_json::Map<String, Value>) -> Result<Query, McpError> {
    for (key, value) in params {
        query = query.param(key, json_to_bolt(key, value)?);
    }
    Ok(query)
}

fn json_to_bolt(key: &str, value: &Value) -> Result<BoltType, McpError> {
    match value {
        Value::String(s) => Ok(BoltType::from(s.as_str())),
        Value::Bool(b) => Ok(BoltType::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(BoltType::from(i))
            } else if let Some(f) = n.as_f64() {
                Ok(BoltType::from(f))
            } else {
                Err(McpError::invalid_params(format!(
                    "parameter '{key}' is out of range"
                )))
            }
        }
        Value::Array(items) => {
            let mut list = Vec::with_capacity(items.len());
            for item in items {
                list.push(json_to_bolt(key, item)?);
            }
            Ok(BoltType::from(list))
        }
        Value::Null | Value::Object(_) => Err(McpError::invalid_params(format!(
            "parameter '{key}' must be a scalar or a flat list"
        ))),
    }
}

/// Render a row as JSON for pass-through results.
pub fn row_to_json(row: &neo4rs::Row) -> Result<Value, McpError> {
    row.to::<Value>()
        .map_err(|e| McpError::database(format!("row decode failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use serde_json::json;

    fn settings() -> DatabaseSettings {
        DatabaseSettings {
            uri: "bolt://localhost:7687".to_string(),
            username: "neo4j".to_string(),
            password: SecretString::from("unused".to_string()),
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn disconnected_store_reports_database_unavailable() {
        let store = GraphStore::new(settings());
        assert!(!store.is_connected().await);
        assert!(!store.ping().await);
        let err = store.run(neo4rs::query("RETURN 1")).await.unwrap_err();
        assert_eq!(err.category, crate::errors::categories::DATABASE_UNAVAILABLE);
    }

    #[test]
    fn vectors_are_widened_for_bolt() {
        let widened = vector_param(&[0.5f32, -1.0]);
        assert_eq!(widened, vec![0.5f64, -1.0]);
    }

    #[test]
    fn json_params_reject_nested_objects() {
        let mut map = serde_json::Map::new();
        map.insert("bad".to_string(), json!({"nested": true}));
        let result = bind_json_params(neo4rs::query("RETURN $bad"), &map);
        assert!(result.is_err());
    }

    #[test]
    fn json_params_accept_scalars_and_lists() {
        let mut map = serde_json::Map::new();
        map.insert("name".to_string(), json!("Alpha"));
        map.insert("limit".to_string(), json!(10));
        map.insert("score".to_string(), json!(0.75));
        map.insert("flags".to_string(), json!([true, false]));
        assert!(bind_json_params(neo4rs::query("RETURN 1"), &map).is_ok());
    }
}

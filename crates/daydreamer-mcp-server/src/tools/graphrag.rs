//! GraphRAG retrieval over precomputed community summaries.
//!
//! Communities are consumed, not computed: global search vector-matches
//! `CommunitySummary.embedding` through the shared embedder (no second model
//! instance), local search walks an entity's neighborhood.

use serde_json::{Value, json};

use crate::errors::McpError;
use crate::graph::vector_param;

use super::{ToolRegistry, limit_arg, required_str};

const COMMUNITY_VECTOR_INDEX: &str = "community_embedding_index";

pub(super) async fn global_search(
    registry: &ToolRegistry,
    arguments: &Value,
) -> Result<Value, McpError> {
    if !registry.graphrag.enabled || !registry.graphrag.global_search {
        return Err(McpError::feature_disabled("graphrag_global_search"));
    }

    let query_text = required_str(arguments, "query")?;
    let limit = limit_arg(arguments, 5, 25);

    let vector = registry.embedder.encode_single(query_text).await?;

    let query = neo4rs::query(
        "CALL db.index.vector.queryNodes($index, $scan, $vector) \
         YIELD node, score \
         WHERE node:CommunitySummary \
         RETURN node.community_id AS community_id, node.name AS name, \
         node.member_count AS member_count, node.summary AS summary, score \
         ORDER BY score DESC LIMIT $limit",
    )
    .param("index", COMMUNITY_VECTOR_INDEX)
    .param("scan", limit * 4)
    .param("vector", vector_param(&vector))
    .param("limit", limit);

    let rows = registry.graph.fetch(query).await?;
    let mut communities = Vec::with_capacity(rows.len());
    for row in rows {
        communities.push(json!({
            "community_id": row.get::<Option<String>>("community_id").ok().flatten(),
            "name": row.get::<Option<String>>("name").ok().flatten(),
            "member_count": row.get::<i64>("member_count").unwrap_or_default(),
            "summary": row.get::<Option<String>>("summary").ok().flatten(),
            "score": row.get::<f64>("score").unwrap_or_default(),
        }));
    }

    Ok(json!({
        "query": query_text,
        "count": communities.len(),
        "communities": communities,
    }))
}

pub(super) async fn local_search(
    registry: &ToolRegistry,
    arguments: &Value,
) -> Result<Value, McpError> {
    if !registry.graphrag.enabled || !registry.graphrag.local_search {
        return Err(McpError::feature_disabled("graphrag_local_search"));
    }

    let entity_name = required_str(arguments, "entity_name")?;
    let hops = arguments
        .get("hops")
        .and_then(Value::as_u64)
        .unwrap_or(2)
        .clamp(1, 2);
    let limit = limit_arg(arguments, 50, 200);

    // The variable-length bound cannot be a parameter; `hops` is clamped to
    // the two legal literals.
    let text = format!(
        "MATCH p = (e:Entity {{name: $name}})-[*1..{hops}]-(m:Entity) \
         WHERE m.name <> $name \
         RETURN DISTINCT m.name AS neighbor, m.entityType AS entity_type, \
         length(p) AS distance, [rel IN relationships(p) | type(rel)] AS path \
         ORDER BY distance ASC, neighbor ASC LIMIT $limit"
    );
    let query = neo4rs::query(&text)
        .param("name", entity_name)
        .param("limit", limit);

    let rows = registry.graph.fetch(query).await?;
    let mut neighbors = Vec::with_capacity(rows.len());
    for row in rows {
        neighbors.push(json!({
            "neighbor": row.get::<String>("neighbor").unwrap_or_default(),
            "entityType": row.get::<Option<String>>("entity_type").ok().flatten(),
            "distance": row.get::<i64>("distance").unwrap_or_default(),
            "path": row.get::<Vec<String>>("path").unwrap_or_default(),
        }));
    }

    Ok(json!({
        "entity": entity_name,
        "hops": hops,
        "count": neighbors.len(),
        "neighbors": neighbors,
    }))
}

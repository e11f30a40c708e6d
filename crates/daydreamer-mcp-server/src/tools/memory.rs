//! Core memory tools: search, stats, relations, raw Cypher, batch embedding.

use daydreamer_schema::registry::{RelationDraft, validate_relationships};
use neo4rs::Query;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::errors::McpError;
use crate::graph::{bind_json_params, row_to_json, vector_param};

use super::{ToolRegistry, limit_arg, required_str};

/// Vector-index scan width per requested result. Wide scans keep migration
/// artifacts from crowding out organic entities before filtering.
const SCAN_MULTIPLIER: i64 = 1000;

const ENTITY_VECTOR_INDEX: &str = "entity_embedding_index";

pub(super) async fn search_nodes(
    registry: &ToolRegistry,
    arguments: &Value,
) -> Result<Value, McpError> {
    let query_text = required_str(arguments, "query")?;
    let limit = limit_arg(arguments, 10, 100);
    let semantic = arguments
        .get("semantic")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    if semantic {
        match registry.embedder.encode_single(query_text).await {
            Ok(vector) => return semantic_search(registry, query_text, &vector, limit).await,
            Err(e) => {
                warn!("semantic search degraded to exact match: {e}");
            }
        }
    }

    exact_search(registry, query_text, limit).await
}

async fn semantic_search(
    registry: &ToolRegistry,
    query_text: &str,
    vector: &[f32],
    limit: i64,
) -> Result<Value, McpError> {
    let query = neo4rs::query(
        "CALL db.index.vector.queryNodes($index, $scan, $vector) \
         YIELD node, score \
         WHERE node:SemanticEntity \
         RETURN node.name AS name, node.entityType AS entity_type, score \
         ORDER BY score DESC LIMIT $limit",
    )
    .param("index", ENTITY_VECTOR_INDEX)
    .param("scan", limit * SCAN_MULTIPLIER)
    .param("vector", vector_param(vector))
    .param("limit", limit);

    let rows = registry.graph.fetch(query).await?;
    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        results.push(json!({
            "name": row.get::<String>("name").unwrap_or_default(),
            "entityType": row.get::<Option<String>>("entity_type").ok().flatten(),
            "score": row.get::<f64>("score").unwrap_or_default(),
        }));
    }

    Ok(json!({
        "query": query_text,
        "mode": "semantic",
        "count": results.len(),
        "results": results,
    }))
}

async fn exact_search(
    registry: &ToolRegistry,
    query_text: &str,
    limit: i64,
) -> Result<Value, McpError> {
    let query = neo4rs::query(
        "MATCH (e:Entity) WHERE toLower(e.name) CONTAINS toLower($text) \
         RETURN e.name AS name, e.entityType AS entity_type \
         ORDER BY e.name LIMIT $limit",
    )
    .param("text", query_text)
    .param("limit", limit);

    let rows = registry.graph.fetch(query).await?;
    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        results.push(json!({
            "name": row.get::<String>("name").unwrap_or_default(),
            "entityType": row.get::<Option<String>>("entity_type").ok().flatten(),
        }));
    }

    Ok(json!({
        "query": query_text,
        "mode": "exact",
        "count": results.len(),
        "results": results,
    }))
}

pub(super) async fn memory_stats(registry: &ToolRegistry) -> Result<Value, McpError> {
    let entity_rows = registry
        .graph
        .fetch(neo4rs::query("MATCH (e:Entity) RETURN count(e) AS count"))
        .await?;
    let entities = single_count(&entity_rows, "count");

    let observation_rows = registry
        .graph
        .fetch(neo4rs::query(
            "MATCH (o:Observation) \
             RETURN count(o) AS total, \
             count(CASE WHEN o.has_embedding THEN 1 END) AS embedded",
        ))
        .await?;
    let observations = single_count(&observation_rows, "total");
    let embedded = single_count(&observation_rows, "embedded");

    let session_rows = registry
        .graph
        .fetch(neo4rs::query(
            "MATCH (s:ConversationSession) RETURN count(s) AS count",
        ))
        .await?;
    let sessions = single_count(&session_rows, "count");

    let theme_rows = registry
        .graph
        .fetch(neo4rs::query(
            "MATCH (o:Observation) \
             RETURN coalesce(o.semantic_theme, 'general') AS theme, count(*) AS count \
             ORDER BY count DESC",
        ))
        .await?;
    let mut themes = serde_json::Map::new();
    for row in &theme_rows {
        let theme = row.get::<String>("theme").unwrap_or_default();
        themes.insert(theme, json!(row.get::<i64>("count").unwrap_or_default()));
    }

    let coverage = if observations > 0 {
        embedded as f64 / observations as f64
    } else {
        0.0
    };

    Ok(json!({
        "entities": entities,
        "observations": observations,
        "observations_with_embeddings": embedded,
        "embedding_coverage": coverage,
        "conversation_sessions": sessions,
        "theme_distribution": themes,
        "embedder": {
            "loaded": registry.embedder.is_loaded().await,
            "breaker_open": registry.embedder.breaker().is_open(),
            "post_load_rss_bytes": registry.embedder.post_load_rss_bytes(),
        },
    }))
}

pub(super) async fn create_relations(
    registry: &ToolRegistry,
    arguments: &Value,
) -> Result<Value, McpError> {
    let relations: Vec<RelationDraft> = serde_json::from_value(
        arguments
            .get("relations")
            .cloned()
            .ok_or_else(|| McpError::invalid_params("'relations' is required"))?,
    )
    .map_err(|e| McpError::invalid_params(format!("invalid relations: {e}")))?;

    let mut results = Vec::with_capacity(relations.len());
    let mut created = 0usize;
    let mut errors = 0usize;

    for relation in relations {
        let item = match validate_relationships(std::slice::from_ref(&relation), registry.strict) {
            Ok(outcome) if !outcome.rejected.is_empty() => {
                let reason = outcome
                    .rejected
                    .into_iter()
                    .map(|(_, r)| r)
                    .next()
                    .unwrap_or_default();
                Err(reason)
            }
            Ok(outcome) => match outcome.accepted.into_iter().next() {
                Some(normalized) => Ok(normalized),
                None => Err("relation was rejected by the schema registry".to_string()),
            },
            Err(e) => Err(e.to_string()),
        };

        match item {
            Err(reason) => {
                errors += 1;
                results.push(json!({
                    "from": relation.from,
                    "type": relation.rel_type,
                    "to": relation.to,
                    "status": "error",
                    "error": reason,
                }));
            }
            Ok(normalized) => {
                match merge_relation(registry, &normalized).await? {
                    true => {
                        created += 1;
                        results.push(json!({
                            "from": normalized.from,
                            "type": normalized.rel_type,
                            "to": normalized.to,
                            "status": "created",
                        }));
                    }
                    false => {
                        errors += 1;
                        results.push(json!({
                            "from": normalized.from,
                            "type": normalized.rel_type,
                            "to": normalized.to,
                            "status": "error",
                            "error": "one or both endpoint entities do not exist",
                        }));
                    }
                }
            }
        }
    }

    Ok(json!({
        "created": created,
        "errors": errors,
        "results": results,
    }))
}

/// MERGE one validated relationship. The type is interpolated from the
/// canonical allow-list, never from raw input.
async fn merge_relation(
    registry: &ToolRegistry,
    relation: &RelationDraft,
) -> Result<bool, McpError> {
    let text = format!(
        "MATCH (a:Entity {{name: $from}}) MATCH (b:Entity {{name: $to}}) \
         MERGE (a)-[r:{}]->(b) RETURN count(r) AS count",
        relation.rel_type
    );
    let query = neo4rs::query(&text)
        .param("from", relation.from.as_str())
        .param("to", relation.to.as_str());

    let rows = registry.graph.fetch(query).await?;
    Ok(single_count(&rows, "count") > 0)
}

pub(super) async fn search_observations(
    registry: &ToolRegistry,
    arguments: &Value,
) -> Result<Value, McpError> {
    let limit = limit_arg(arguments, 20, 200);

    let mut clauses: Vec<&str> = Vec::new();
    let mut query_text = String::from(
        "MATCH (e:Entity)-[:ENTITY_HAS_OBSERVATION]->(o:Observation)",
    );

    let theme = arguments.get("theme").and_then(Value::as_str);
    let entity = arguments.get("entity").and_then(Value::as_str);
    let date_from = arguments.get("date_from").and_then(Value::as_str);
    let date_to = arguments.get("date_to").and_then(Value::as_str);
    let source = arguments.get("source").and_then(Value::as_str);
    let confidence_min = arguments.get("confidence_min").and_then(Value::as_f64);

    if theme.is_some() {
        clauses.push("o.semantic_theme = $theme");
    }
    if entity.is_some() {
        clauses.push("e.name = $entity");
    }
    if date_from.is_some() {
        clauses.push("o.created_at >= $date_from");
    }
    if date_to.is_some() {
        clauses.push("o.created_at <= $date_to");
    }
    if source.is_some() {
        clauses.push("o.source = $source");
    }
    if confidence_min.is_some() {
        clauses.push("coalesce(o.confidence, 1.0) >= $confidence_min");
    }

    if !clauses.is_empty() {
        query_text.push_str(" WHERE ");
        query_text.push_str(&clauses.join(" AND "));
    }
    query_text.push_str(
        " RETURN o.id AS id, o.content AS content, o.created_at AS created_at, \
         o.semantic_theme AS theme, o.source AS source, e.name AS entity \
         ORDER BY o.created_at DESC LIMIT $limit",
    );

    let mut query = neo4rs::query(&query_text).param("limit", limit);
    if let Some(theme) = theme {
        query = query.param("theme", theme);
    }
    if let Some(entity) = entity {
        query = query.param("entity", entity);
    }
    if let Some(date_from) = date_from {
        query = query.param("date_from", date_from);
    }
    if let Some(date_to) = date_to {
        query = query.param("date_to", date_to);
    }
    if let Some(source) = source {
        query = query.param("source", source);
    }
    if let Some(confidence_min) = confidence_min {
        query = query.param("confidence_min", confidence_min);
    }

    let rows = registry.graph.fetch(query).await?;
    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        results.push(json!({
            "id": row.get::<String>("id").unwrap_or_default(),
            "content": row.get::<String>("content").unwrap_or_default(),
            "created_at": row.get::<String>("created_at").unwrap_or_default(),
            "theme": row.get::<Option<String>>("theme").ok().flatten(),
            "source": row.get::<Option<String>>("source").ok().flatten(),
            "entity": row.get::<String>("entity").unwrap_or_default(),
        }));
    }

    Ok(json!({ "count": results.len(), "observations": results }))
}

pub(super) async fn raw_cypher_query(
    registry: &ToolRegistry,
    arguments: &Value,
) -> Result<Value, McpError> {
    let cypher = required_str(arguments, "query")?;
    daydreamer_schema::check_write(cypher)?;

    let empty = serde_json::Map::new();
    let params = arguments
        .get("params")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let query = bind_json_params(neo4rs::query(cypher), params)?;
    let rows = registry.graph.fetch(query).await?;

    let mut rendered = Vec::with_capacity(rows.len());
    for row in &rows {
        rendered.push(row_to_json(row)?);
    }

    debug!(rows = rendered.len(), "raw cypher executed");
    Ok(json!({ "rows": rendered, "count": rendered.len() }))
}

pub(super) async fn generate_embeddings_batch(
    registry: &ToolRegistry,
    arguments: &Value,
) -> Result<Value, McpError> {
    let node_ids: Vec<String> = serde_json::from_value(
        arguments
            .get("node_ids")
            .cloned()
            .ok_or_else(|| McpError::invalid_params("'node_ids' is required"))?,
    )
    .map_err(|e| McpError::invalid_params(format!("invalid node_ids: {e}")))?;

    if node_ids.is_empty() {
        return Err(McpError::invalid_params("'node_ids' must not be empty"));
    }

    let fetch = neo4rs::query(
        "MATCH (o:Observation) WHERE o.id IN $ids \
         RETURN o.id AS id, o.content AS content",
    )
    .param("ids", node_ids.clone());

    let rows = registry.graph.fetch(fetch).await?;
    let mut ids = Vec::with_capacity(rows.len());
    let mut contents = Vec::with_capacity(rows.len());
    for row in &rows {
        ids.push(row.get::<String>("id").unwrap_or_default());
        contents.push(row.get::<String>("content").unwrap_or_default());
    }

    if ids.is_empty() {
        return Ok(json!({
            "requested": node_ids.len(),
            "found": 0,
            "embedded": 0,
        }));
    }

    let vectors = registry.embedder.encode_batch(&contents).await?;

    let mut updates: Vec<Query> = Vec::with_capacity(ids.len());
    for (id, vector) in ids.iter().zip(&vectors) {
        updates.push(
            neo4rs::query(
                "MATCH (o:Observation {id: $id}) \
                 SET o.jina_vec_v3 = $vector, o.has_embedding = true",
            )
            .param("id", id.as_str())
            .param("vector", vector_param(vector)),
        );
    }
    let embedded = updates.len();
    registry.graph.run_in_transaction(updates).await?;

    Ok(json!({
        "requested": node_ids.len(),
        "found": ids.len(),
        "embedded": embedded,
    }))
}

pub(super) fn single_count(rows: &[neo4rs::Row], column: &str) -> i64 {
    rows.first()
        .and_then(|row| row.get::<i64>(column).ok())
        .unwrap_or_default()
}

//! Read-only queries over ConversationSession and the temporal hierarchy.

use chrono::{Duration, NaiveDate, Utc};
use serde_json::{Value, json};

use crate::errors::McpError;

use super::{ToolRegistry, limit_arg, required_str};

pub(super) async fn search_conversations(
    registry: &ToolRegistry,
    arguments: &Value,
) -> Result<Value, McpError> {
    let text = arguments
        .get("query")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let limit = limit_arg(arguments, 10, 100);

    let query = neo4rs::query(
        "MATCH (s:ConversationSession) \
         WHERE $text = '' OR toLower(coalesce(s.context, '')) CONTAINS toLower($text) \
         RETURN s.session_id AS session_id, s.source AS source, \
         s.context AS context, s.created_at AS created_at \
         ORDER BY s.created_at DESC LIMIT $limit",
    )
    .param("text", text)
    .param("limit", limit);

    let rows = registry.graph.fetch(query).await?;
    let mut sessions = Vec::with_capacity(rows.len());
    for row in rows {
        sessions.push(json!({
            "session_id": row.get::<String>("session_id").unwrap_or_default(),
            "source": row.get::<Option<String>>("source").ok().flatten(),
            "context": row.get::<Option<String>>("context").ok().flatten(),
            "created_at": row.get::<Option<String>>("created_at").ok().flatten(),
        }));
    }

    Ok(json!({ "count": sessions.len(), "sessions": sessions }))
}

pub(super) async fn trace_entity_origin(
    registry: &ToolRegistry,
    arguments: &Value,
) -> Result<Value, McpError> {
    let entity_name = required_str(arguments, "entity_name")?;

    let query = neo4rs::query(
        "MATCH (e:Entity {name: $name}) \
         OPTIONAL MATCH (s:ConversationSession)-[:CONVERSATION_SESSION_ADDED_OBSERVATION]->(e) \
         OPTIONAL MATCH (e)-[:ENTITY_HAS_OBSERVATION]->(o:Observation) \
         RETURN e.created AS created, e.created_by AS created_by, \
         e.entityType AS entity_type, \
         collect(DISTINCT s.session_id) AS sessions, \
         min(o.created_at) AS first_observation, \
         count(DISTINCT o) AS observation_count",
    )
    .param("name", entity_name);

    let rows = registry.graph.fetch(query).await?;
    let Some(row) = rows.first() else {
        return Ok(json!({ "entity": entity_name, "found": false }));
    };

    Ok(json!({
        "entity": entity_name,
        "found": true,
        "created": row.get::<Option<String>>("created").ok().flatten(),
        "created_by": row.get::<Option<String>>("created_by").ok().flatten(),
        "entityType": row.get::<Option<String>>("entity_type").ok().flatten(),
        "sessions": row.get::<Vec<String>>("sessions").unwrap_or_default(),
        "first_observation": row.get::<Option<String>>("first_observation").ok().flatten(),
        "observation_count": row.get::<i64>("observation_count").unwrap_or_default(),
    }))
}

pub(super) async fn get_temporal_context(
    registry: &ToolRegistry,
    arguments: &Value,
) -> Result<Value, McpError> {
    let date = match arguments.get("date").and_then(Value::as_str) {
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map_err(|_| McpError::invalid_params("'date' must be YYYY-MM-DD"))?,
        None => Utc::now().date_naive(),
    };
    let days = arguments
        .get("days")
        .and_then(Value::as_u64)
        .unwrap_or(1)
        .clamp(1, 31) as i64;
    let limit = limit_arg(arguments, 50, 200);

    let from = date - Duration::days(days - 1);
    let query = neo4rs::query(
        "MATCH (o:Observation)-[:OCCURRED_ON]->(d:Day) \
         WHERE d.date >= $from AND d.date <= $to \
         OPTIONAL MATCH (e:Entity)-[:ENTITY_HAS_OBSERVATION]->(o) \
         RETURN d.date AS date, e.name AS entity, o.content AS content, \
         o.semantic_theme AS theme, o.created_at AS created_at \
         ORDER BY o.created_at DESC LIMIT $limit",
    )
    .param("from", from.format("%Y-%m-%d").to_string())
    .param("to", date.format("%Y-%m-%d").to_string())
    .param("limit", limit);

    let rows = registry.graph.fetch(query).await?;
    let mut observations = Vec::with_capacity(rows.len());
    for row in rows {
        observations.push(json!({
            "date": row.get::<String>("date").unwrap_or_default(),
            "entity": row.get::<Option<String>>("entity").ok().flatten(),
            "content": row.get::<String>("content").unwrap_or_default(),
            "theme": row.get::<Option<String>>("theme").ok().flatten(),
            "created_at": row.get::<String>("created_at").unwrap_or_default(),
        }));
    }

    Ok(json!({
        "date": date.format("%Y-%m-%d").to_string(),
        "window_days": days,
        "count": observations.len(),
        "observations": observations,
    }))
}

pub(super) async fn get_breakthrough_sessions(
    registry: &ToolRegistry,
    arguments: &Value,
) -> Result<Value, McpError> {
    let limit = limit_arg(arguments, 5, 50);

    let query = neo4rs::query(
        "MATCH (s:ConversationSession)-[:CONVERSATION_SESSION_ADDED_OBSERVATION]->(e:Entity) \
         RETURN s.session_id AS session_id, s.context AS context, \
         s.created_at AS created_at, count(DISTINCT e) AS entities_touched \
         ORDER BY entities_touched DESC LIMIT $limit",
    )
    .param("limit", limit);

    let rows = registry.graph.fetch(query).await?;
    let mut sessions = Vec::with_capacity(rows.len());
    for row in rows {
        sessions.push(json!({
            "session_id": row.get::<String>("session_id").unwrap_or_default(),
            "context": row.get::<Option<String>>("context").ok().flatten(),
            "created_at": row.get::<Option<String>>("created_at").ok().flatten(),
            "entities_touched": row.get::<i64>("entities_touched").unwrap_or_default(),
        }));
    }

    Ok(json!({ "count": sessions.len(), "sessions": sessions }))
}

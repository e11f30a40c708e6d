//! Declarative tool descriptors.
//!
//! Names are stable API; the input schemas are literal JSON Schema documents
//! compiled once at startup and used to validate every `tools/call`.

use jsonschema::Validator;
use serde_json::{Value, json};

use crate::errors::ServerError;

pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
    pub validator: Validator,
}

fn descriptor(
    name: &'static str,
    description: &'static str,
    input_schema: Value,
) -> Result<ToolDescriptor, ServerError> {
    let validator = jsonschema::validator_for(&input_schema)
        .map_err(|e| ServerError::ToolSchema(format!("{name}: {e}")))?;
    Ok(ToolDescriptor {
        name,
        description,
        input_schema,
        validator,
    })
}

/// The seventeen memory tools, in registry order.
pub fn build() -> Result<Vec<ToolDescriptor>, ServerError> {
    Ok(vec![
        descriptor(
            "search_nodes",
            "Search entities by semantic similarity (256-D vector index) or exact name match.",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search text" },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 100, "default": 10 },
                    "semantic": { "type": "boolean", "default": true }
                },
                "required": ["query"]
            }),
        )?,
        descriptor(
            "memory_stats",
            "Graph totals: entities, observations, embedding coverage, sessions, theme distribution.",
            json!({ "type": "object", "properties": {} }),
        )?,
        descriptor(
            "create_entities",
            "Create entities (with optional observations) through the V6 write pipeline.",
            json!({
                "type": "object",
                "properties": {
                    "entities": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": { "type": "string" },
                                "entityType": { "type": "string" },
                                "observations": {
                                    "type": "array",
                                    "items": { "type": "string" }
                                }
                            },
                            "required": ["name", "entityType"]
                        }
                    },
                    "conversation_id": { "type": "string" }
                },
                "required": ["entities"]
            }),
        )?,
        descriptor(
            "add_observations",
            "Append observations to an entity through the V6 write pipeline.",
            json!({
                "type": "object",
                "properties": {
                    "entity_name": { "type": "string" },
                    "observations": {
                        "type": "array",
                        "items": {
                            "oneOf": [
                                { "type": "string" },
                                {
                                    "type": "object",
                                    "properties": {
                                        "content": { "type": "string" },
                                        "source": { "type": "string" }
                                    },
                                    "required": ["content"]
                                }
                            ]
                        }
                    },
                    "conversation_id": { "type": "string" }
                },
                "required": ["entity_name", "observations"]
            }),
        )?,
        descriptor(
            "create_relations",
            "MERGE canonical relationships between existing entities. Protected temporal relationships are refused.",
            json!({
                "type": "object",
                "properties": {
                    "relations": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "from": { "type": "string" },
                                "type": { "type": "string" },
                                "to": { "type": "string" }
                            },
                            "required": ["from", "type", "to"]
                        }
                    }
                },
                "required": ["relations"]
            }),
        )?,
        descriptor(
            "search_observations",
            "Filter observations by theme, entity, date range, source, or confidence floor.",
            json!({
                "type": "object",
                "properties": {
                    "theme": { "type": "string" },
                    "entity": { "type": "string" },
                    "date_from": { "type": "string", "description": "ISO date lower bound" },
                    "date_to": { "type": "string", "description": "ISO date upper bound" },
                    "source": { "type": "string" },
                    "confidence_min": { "type": "number" },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 200, "default": 20 }
                }
            }),
        )?,
        descriptor(
            "search_conversations",
            "Search conversation sessions by context text.",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 100, "default": 10 }
                }
            }),
        )?,
        descriptor(
            "trace_entity_origin",
            "Report when an entity was created, by whom, and which sessions contributed to it.",
            json!({
                "type": "object",
                "properties": {
                    "entity_name": { "type": "string" }
                },
                "required": ["entity_name"]
            }),
        )?,
        descriptor(
            "get_temporal_context",
            "Observations bound to a day (or a window of days) through the temporal hierarchy.",
            json!({
                "type": "object",
                "properties": {
                    "date": { "type": "string", "description": "YYYY-MM-DD, default today" },
                    "days": { "type": "integer", "minimum": 1, "maximum": 31, "default": 1 },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 200, "default": 50 }
                }
            }),
        )?,
        descriptor(
            "get_breakthrough_sessions",
            "Conversation sessions ranked by how many entities they touched.",
            json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "minimum": 1, "maximum": 50, "default": 5 }
                }
            }),
        )?,
        descriptor(
            "graphrag_global_search",
            "Vector-match community summaries for corpus-level questions.",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 25, "default": 5 }
                },
                "required": ["query"]
            }),
        )?,
        descriptor(
            "graphrag_local_search",
            "Entity neighborhood traversal with ranked edges (at most two hops).",
            json!({
                "type": "object",
                "properties": {
                    "entity_name": { "type": "string" },
                    "hops": { "type": "integer", "minimum": 1, "maximum": 2, "default": 2 },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 200, "default": 50 }
                },
                "required": ["entity_name"]
            }),
        )?,
        descriptor(
            "raw_cypher_query",
            "Parameterized Cypher pass-through for operational use. Writes touching protected relationships or V5 properties are refused.",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "params": { "type": "object" }
                },
                "required": ["query"]
            }),
        )?,
        descriptor(
            "generate_embeddings_batch",
            "Encode and store vectors for the named observation nodes.",
            json!({
                "type": "object",
                "properties": {
                    "node_ids": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 1
                    }
                },
                "required": ["node_ids"]
            }),
        )?,
        descriptor(
            "conversational_memory_search",
            "Conversational memory search (full implementation lives in the stdio deployment).",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" }
                }
            }),
        )?,
        descriptor(
            "virtual_context_search",
            "Virtual context search (full implementation lives in the stdio deployment).",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" }
                }
            }),
        )?,
        descriptor(
            "lightweight_embodiment",
            "Lightweight embodiment bootstrap (full implementation lives in the stdio deployment).",
            json!({
                "type": "object",
                "properties": {}
            }),
        )?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_seventeen_tools() {
        assert_eq!(build().unwrap().len(), 17);
    }

    #[test]
    fn names_are_unique() {
        let descriptors = build().unwrap();
        let mut names: Vec<_> = descriptors.iter().map(|d| d.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 17);
    }

    #[test]
    fn schemas_validate_their_own_examples() {
        let descriptors = build().unwrap();
        let search = descriptors.iter().find(|d| d.name == "search_nodes").unwrap();
        assert!(search.validator.is_valid(&json!({"query": "alpha"})));
        assert!(!search.validator.is_valid(&json!({"limit": 5})));

        let create = descriptors
            .iter()
            .find(|d| d.name == "create_entities")
            .unwrap();
        assert!(create.validator.is_valid(&json!({
            "entities": [{"name": "Alpha", "entityType": "test", "observations": ["x"]}]
        })));
        assert!(!create.validator.is_valid(&json!({"entities": [{"name": "Alpha"}]})));
    }
}

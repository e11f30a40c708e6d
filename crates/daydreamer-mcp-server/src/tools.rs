//! Tool registry and handlers.
//!
//! A fixed table of seventeen tools over the graph memory. Handlers treat
//! the database as a slow external resource: every failure surfaces as a
//! typed error for the dispatcher, never as a closed stream.

use std::sync::Arc;

use serde_json::Value;

use crate::embedding::Embedder;
use crate::errors::{McpError, ServerError};
use crate::graph::GraphStore;
use crate::pipeline::{MemoryPipeline, parse_entities, parse_observations};
use crate::runtime::GraphRagSettings;

pub mod descriptors;
mod graphrag;
mod memory;
mod stubs;
mod temporal;

use descriptors::ToolDescriptor;

pub struct ToolRegistry {
    pub(crate) graph: Arc<GraphStore>,
    pub(crate) embedder: Arc<Embedder>,
    pub(crate) pipeline: MemoryPipeline,
    pub(crate) graphrag: GraphRagSettings,
    pub(crate) strict: bool,
    descriptors: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new(
        graph: Arc<GraphStore>,
        embedder: Arc<Embedder>,
        graphrag: GraphRagSettings,
        strict: bool,
    ) -> Result<Self, ServerError> {
        let pipeline = MemoryPipeline::new(Arc::clone(&graph), Arc::clone(&embedder), strict);
        Ok(Self {
            graph,
            embedder,
            pipeline,
            graphrag,
            strict,
            descriptors: descriptors::build()?,
        })
    }

    /// `[{name, description, inputSchema}]` for `tools/list`.
    pub fn descriptors(&self) -> Vec<Value> {
        self.descriptors
            .iter()
            .map(|d| {
                serde_json::json!({
                    "name": d.name,
                    "description": d.description,
                    "inputSchema": d.input_schema,
                })
            })
            .collect()
    }

    /// Validate arguments against the tool's input schema. Strict mode also
    /// rejects fields the schema does not declare.
    pub fn validate_arguments(
        &self,
        name: &str,
        arguments: &Value,
        strict: bool,
    ) -> Result<(), McpError> {
        let descriptor = self
            .descriptor(name)
            .ok_or_else(|| McpError::tool_not_found(name))?;

        if let Some(error) = descriptor.validator.iter_errors(arguments).next() {
            return Err(McpError::invalid_params(format!(
                "invalid arguments for {name}: {error}"
            )));
        }

        if strict
            && let (Some(args), Some(properties)) = (
                arguments.as_object(),
                descriptor
                    .input_schema
                    .get("properties")
                    .and_then(Value::as_object),
            )
        {
            for key in args.keys() {
                if !properties.contains_key(key) {
                    return Err(McpError::invalid_params(format!(
                        "unknown argument '{key}' for {name}"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Invoke a tool by name.
    #[tracing::instrument(skip_all, fields(tool = name))]
    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        match name {
            "search_nodes" => memory::search_nodes(self, &arguments).await,
            "memory_stats" => memory::memory_stats(self).await,
            "create_entities" => {
                let entities = parse_entities(&arguments)?;
                let conversation_id = optional_str(&arguments, "conversation_id");
                let summary = self.pipeline.create_entities(entities, conversation_id).await?;
                to_value(summary)
            }
            "add_observations" => {
                let (entity_name, observations) = parse_observations(&arguments)?;
                let conversation_id = optional_str(&arguments, "conversation_id");
                let summary = self
                    .pipeline
                    .add_observations(&entity_name, observations, conversation_id)
                    .await?;
                to_value(summary)
            }
            "create_relations" => memory::create_relations(self, &arguments).await,
            "search_observations" => memory::search_observations(self, &arguments).await,
            "search_conversations" => temporal::search_conversations(self, &arguments).await,
            "trace_entity_origin" => temporal::trace_entity_origin(self, &arguments).await,
            "get_temporal_context" => temporal::get_temporal_context(self, &arguments).await,
            "get_breakthrough_sessions" => {
                temporal::get_breakthrough_sessions(self, &arguments).await
            }
            "graphrag_global_search" => graphrag::global_search(self, &arguments).await,
            "graphrag_local_search" => graphrag::local_search(self, &arguments).await,
            "raw_cypher_query" => memory::raw_cypher_query(self, &arguments).await,
            "generate_embeddings_batch" => {
                memory::generate_embeddings_batch(self, &arguments).await
            }
            "conversational_memory_search" => Ok(stubs::conversational_memory_search()),
            "virtual_context_search" => Ok(stubs::virtual_context_search()),
            "lightweight_embodiment" => Ok(stubs::lightweight_embodiment()),
            other => Err(McpError::tool_not_found(other)),
        }
    }

    fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        use crate::runtime::Config;

        let config = Config::default();
        let graph = Arc::new(GraphStore::new(config.database_settings()));
        let embedder = Arc::new(Embedder::with_loader(
            &config.embedding_settings(),
            Arc::new(|| {
                Err(crate::embedding::EmbeddingError::Unavailable(
                    "no backend in tests".to_string(),
                ))
            }),
        ));
        Self::new(graph, embedder, config.graphrag_settings(), false)
            .unwrap_or_else(|e| panic!("tool registry must build: {e}"))
    }
}

pub(crate) fn required_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, McpError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| McpError::invalid_params(format!("'{key}' is required")))
}

pub(crate) fn optional_str(arguments: &Value, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn limit_arg(arguments: &Value, default: u64, max: u64) -> i64 {
    let limit = arguments
        .get("limit")
        .and_then(Value::as_u64)
        .unwrap_or(default)
        .clamp(1, max);
    limit as i64
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, McpError> {
    serde_json::to_value(value).map_err(|e| McpError::internal(format!("serialization failed: {e}")))
}

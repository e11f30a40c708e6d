//! The V6 write pipeline.
//!
//! The only legal path for creating Observations and the temporal hierarchy.
//! Per top-level call: validate and normalize, stamp timestamps, classify
//! themes, acquire embeddings best-effort, bind Day/Month/Year, MERGE the
//! entity, CREATE observations, link, commit. One transaction, all or
//! nothing. Embedding failure never fails a write; the observation lands
//! with `has_embedding = false`.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use daydreamer_schema::registry::{self, EntityDraft};
use neo4rs::Query;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::errors::McpError;
use crate::graph::{GraphStore, vector_param};

/// Provenance stamped on nodes created through the MCP surface.
pub const MCP_SOURCE: &str = "mcp_tool";
pub const CREATED_BY: &str = "daydreamer-mcp-server";

pub struct MemoryPipeline {
    graph: Arc<GraphStore>,
    embedder: Arc<Embedder>,
    strict: bool,
}

/// One observation as submitted: a bare string or `{content, source}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ObservationInput {
    Text(String),
    Detailed {
        content: String,
        #[serde(default)]
        source: Option<String>,
    },
}

impl ObservationInput {
    fn into_parts(self) -> (String, String) {
        match self {
            Self::Text(content) => (content, MCP_SOURCE.to_string()),
            Self::Detailed { content, source } => {
                (content, source.unwrap_or_else(|| MCP_SOURCE.to_string()))
            }
        }
    }
}

/// Result contract of a top-level write call.
#[derive(Debug, Serialize)]
pub struct WriteSummary {
    pub created_entities: Vec<String>,
    pub observations_created: usize,
    pub embeddings_generated: usize,
    pub schema_warnings: Vec<String>,
    pub v6_compliant: bool,
}

/// A fully-prepared observation, ready for the transaction.
#[derive(Debug, Clone)]
pub struct ObservationDraft {
    pub id: String,
    pub content: String,
    pub created_at: String,
    pub source: String,
    pub semantic_theme: &'static str,
    pub conversation_id: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

impl MemoryPipeline {
    pub fn new(graph: Arc<GraphStore>, embedder: Arc<Embedder>, strict: bool) -> Self {
        Self {
            graph,
            embedder,
            strict,
        }
    }

    /// `create_entities`: validate each item, then write entities plus their
    /// observations in a single transaction.
    pub async fn create_entities(
        &self,
        entities: Vec<EntityDraft>,
        conversation_id: Option<String>,
    ) -> Result<WriteSummary, McpError> {
        let mut warnings = Vec::new();
        let mut accepted = Vec::new();

        // Item-level enforcement: a strict-mode failure drops the item, not
        // the batch.
        for entity in entities {
            match registry::validate_entities(std::slice::from_ref(&entity), self.strict) {
                Ok(outcome) => {
                    warnings.extend(outcome.warnings);
                    warnings.extend(outcome.rejected.into_iter().map(|(_, reason)| reason));
                    accepted.extend(outcome.accepted);
                }
                Err(e) => warnings.push(format!("entity '{}': {e}", entity.name)),
            }
        }

        let now = Utc::now();
        let created_at = iso_timestamp(now);
        let mut queries = vec![temporal_binding_query(now)];
        let mut created_entities = Vec::with_capacity(accepted.len());
        let mut observations_created = 0;
        let mut embeddings_generated = 0;

        for entity in &accepted {
            queries.push(entity_merge_query(
                &entity.name,
                Some(&entity.entity_type),
                &created_at,
            ));
            created_entities.push(entity.name.clone());

            for content in &entity.observations {
                let draft = self
                    .prepare_draft(content.clone(), MCP_SOURCE.to_string(), &conversation_id)
                    .await;
                if draft.embedding.is_some() {
                    embeddings_generated += 1;
                }
                observations_created += 1;
                queries.push(observation_query(&draft, &entity.name, now));
            }

            if let Some(session_id) = &conversation_id {
                queries.push(conversation_link_query(session_id, &entity.name, &created_at));
            }
        }

        if !created_entities.is_empty() {
            self.graph.run_in_transaction(queries).await?;
        }

        debug!(
            entities = created_entities.len(),
            observations = observations_created,
            "create_entities committed"
        );

        Ok(WriteSummary {
            created_entities,
            observations_created,
            embeddings_generated,
            schema_warnings: warnings,
            v6_compliant: true,
        })
    }

    /// `add_observations`: append observations to one entity, creating it if
    /// it does not exist yet.
    pub async fn add_observations(
        &self,
        entity_name: &str,
        observations: Vec<ObservationInput>,
        conversation_id: Option<String>,
    ) -> Result<WriteSummary, McpError> {
        if entity_name.trim().is_empty() {
            return Err(McpError::invalid_params("entity_name must not be empty"));
        }
        if observations.is_empty() {
            return Err(McpError::invalid_params("observations must not be empty"));
        }

        let entity_name = entity_name.trim();
        let now = Utc::now();
        let created_at = iso_timestamp(now);
        let mut queries = vec![
            temporal_binding_query(now),
            entity_merge_query(entity_name, None, &created_at),
        ];

        let mut observations_created = 0;
        let mut embeddings_generated = 0;

        for input in observations {
            let (content, source) = input.into_parts();
            let draft = self.prepare_draft(content, source, &conversation_id).await;
            if draft.embedding.is_some() {
                embeddings_generated += 1;
            }
            observations_created += 1;
            queries.push(observation_query(&draft, entity_name, now));
        }

        if let Some(session_id) = &conversation_id {
            queries.push(conversation_link_query(session_id, entity_name, &created_at));
        }

        self.graph.run_in_transaction(queries).await?;

        Ok(WriteSummary {
            created_entities: vec![],
            observations_created,
            embeddings_generated,
            schema_warnings: vec![],
            v6_compliant: true,
        })
    }

    /// Classify, stamp and (best-effort) embed one observation. Failure to
    /// embed degrades the draft, never the write.
    pub async fn prepare_draft(
        &self,
        content: String,
        source: String,
        conversation_id: &Option<String>,
    ) -> ObservationDraft {
        let semantic_theme = daydreamer_schema::classify_theme(&content);
        let embedding = match self.embedder.encode_single(&content).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!("embedding degraded for observation: {e}");
                None
            }
        };

        ObservationDraft {
            id: Uuid::new_v4().to_string(),
            content,
            created_at: iso_timestamp(Utc::now()),
            source,
            semantic_theme,
            conversation_id: conversation_id.clone(),
            embedding,
        }
    }
}

/// ISO-8601 with timezone, second precision.
pub fn iso_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// `(day, month, year)` keys for the temporal hierarchy. The month key is
/// zero-padded `YYYY-MM`; the legacy `year_month` shape is gone.
pub fn temporal_keys(now: DateTime<Utc>) -> (String, String, i64) {
    use chrono::Datelike;
    (
        now.format("%Y-%m-%d").to_string(),
        now.format("%Y-%m").to_string(),
        i64::from(now.year()),
    )
}

/// MERGE the Day/Month/Year spine and its hierarchy edges.
fn temporal_binding_query(now: DateTime<Utc>) -> Query {
    let (day, month, year) = temporal_keys(now);
    neo4rs::query(
        "MERGE (d:Day:Perennial:Entity {date: $day}) \
         MERGE (m:Month:Perennial:Entity {date: $month}) \
         MERGE (y:Year:Perennial:Entity {year: $year}) \
         MERGE (d)-[:PART_OF_MONTH]->(m) \
         MERGE (m)-[:PART_OF_YEAR]->(y)",
    )
    .param("day", day)
    .param("month", month)
    .param("year", year)
}

/// MERGE an entity with canonical labels. Attributes are set on create only;
/// a second MERGE never rewrites them.
fn entity_merge_query(name: &str, entity_type: Option<&str>, created_at: &str) -> Query {
    let text = if entity_type.is_some() {
        "MERGE (e:Entity {name: $name}) \
         ON CREATE SET e:SemanticEntity, e.entityType = $entity_type, \
         e.created = $created_at, e.created_by = $created_by"
    } else {
        "MERGE (e:Entity {name: $name}) \
         ON CREATE SET e:SemanticEntity, e.created = $created_at, \
         e.created_by = $created_by"
    };

    let mut query = neo4rs::query(text)
        .param("name", name)
        .param("created_at", created_at)
        .param("created_by", CREATED_BY);
    if let Some(entity_type) = entity_type {
        query = query.param("entity_type", entity_type);
    }
    query
}

/// Property fragment for the observation CREATE; optional properties appear
/// only when present so absent stays absent, not null.
pub fn observation_property_fragment(draft: &ObservationDraft) -> String {
    let mut fragment = String::from(
        "id: $id, content: $content, created_at: $created_at, source: $source, \
         created_by: $created_by, semantic_theme: $semantic_theme, has_embedding: $has_embedding",
    );
    if draft.conversation_id.is_some() {
        fragment.push_str(", conversation_id: $conversation_id");
    }
    if draft.embedding.is_some() {
        fragment.push_str(", jina_vec_v3: $jina_vec_v3");
    }
    fragment
}

/// CREATE one observation with exactly the three canonical labels, link it
/// to its entity and to today's Day.
fn observation_query(draft: &ObservationDraft, entity_name: &str, now: DateTime<Utc>) -> Query {
    let (day, _, _) = temporal_keys(now);
    let text = format!(
        "MATCH (e:Entity {{name: $entity_name}}) \
         MATCH (d:Day {{date: $day}}) \
         CREATE (o:Observation:Perennial:Entity {{{}}}) \
         CREATE (e)-[:ENTITY_HAS_OBSERVATION]->(o) \
         CREATE (o)-[:OCCURRED_ON]->(d)",
        observation_property_fragment(draft)
    );

    let mut query = neo4rs::query(&text)
        .param("entity_name", entity_name)
        .param("day", day)
        .param("id", draft.id.as_str())
        .param("content", draft.content.as_str())
        .param("created_at", draft.created_at.as_str())
        .param("source", draft.source.as_str())
        .param("created_by", CREATED_BY)
        .param("semantic_theme", draft.semantic_theme)
        .param("has_embedding", draft.embedding.is_some());

    if let Some(conversation_id) = &draft.conversation_id {
        query = query.param("conversation_id", conversation_id.as_str());
    }
    if let Some(embedding) = &draft.embedding {
        query = query.param("jina_vec_v3", vector_param(embedding));
    }
    query
}

/// Provenance: the conversation session that added observations to an entity.
fn conversation_link_query(session_id: &str, entity_name: &str, created_at: &str) -> Query {
    neo4rs::query(
        "MERGE (c:ConversationSession {session_id: $session_id}) \
         ON CREATE SET c.source = $source, c.created_at = $created_at \
         WITH c MATCH (e:Entity {name: $entity_name}) \
         MERGE (c)-[:CONVERSATION_SESSION_ADDED_OBSERVATION]->(e)",
    )
    .param("session_id", session_id)
    .param("source", MCP_SOURCE)
    .param("created_at", created_at)
    .param("entity_name", entity_name)
}

/// Parse tool arguments for `create_entities`.
pub fn parse_entities(arguments: &Value) -> Result<Vec<EntityDraft>, McpError> {
    let entities = arguments
        .get("entities")
        .ok_or_else(|| McpError::invalid_params("'entities' is required"))?;
    serde_json::from_value(entities.clone())
        .map_err(|e| McpError::invalid_params(format!("invalid entities: {e}")))
}

/// Parse tool arguments for `add_observations`.
pub fn parse_observations(arguments: &Value) -> Result<(String, Vec<ObservationInput>), McpError> {
    let entity_name = arguments
        .get("entity_name")
        .and_then(Value::as_str)
        .ok_or_else(|| McpError::invalid_params("'entity_name' is required"))?;
    let observations = arguments
        .get("observations")
        .ok_or_else(|| McpError::invalid_params("'observations' is required"))?;
    let observations = serde_json::from_value(observations.clone())
        .map_err(|e| McpError::invalid_params(format!("invalid observations: {e}")))?;
    Ok((entity_name.to_string(), observations))
}

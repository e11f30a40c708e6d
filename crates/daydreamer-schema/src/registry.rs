//! The canonical name tables and the validators that enforce them.
//!
//! The registry is read-only: writers normalize through it, they never extend
//! it at runtime. Strict mode turns unknown names into
//! [`SchemaEnforcementError`]; lenient mode accepts the item and records a
//! warning so batch imports keep moving.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical entity types. `entityType` values are lowercased before lookup.
pub const ENTITY_TYPES: &[&str] = &[
    "person",
    "organization",
    "project",
    "technology",
    "concept",
    "event",
    "document",
    "conversation",
    "insight",
    "memory",
    "place",
    "artifact",
    "test",
];

/// Relationship types that tool calls may create directly.
pub const ALLOWED_RELATIONSHIPS: &[&str] = &[
    "RELATES_TO",
    "PART_OF",
    "KNOWS",
    "USES",
    "CREATED",
    "INFLUENCES",
    "DERIVED_FROM",
    "DISCUSSED_IN",
    "MEMBER_OF_COMMUNITY",
    "CONVERSATION_SESSION_ADDED_OBSERVATION",
];

/// Relationship types only the V6 write pipeline may create. Tool calls that
/// name one of these are refused per item.
pub const PROTECTED_RELATIONSHIPS: &[&str] = &[
    "ENTITY_HAS_OBSERVATION",
    "OCCURRED_ON",
    "PART_OF_MONTH",
    "PART_OF_YEAR",
];

/// Labels every Observation node carries, and nothing else.
pub const OBSERVATION_LABELS: &[&str] = &["Observation", "Perennial", "Entity"];

/// Properties a V6 Observation may carry.
pub const OBSERVATION_PROPERTIES: &[&str] = &[
    "id",
    "content",
    "created_at",
    "source",
    "created_by",
    "semantic_theme",
    "conversation_id",
    "jina_vec_v3",
    "has_embedding",
];

/// Properties a V6 Entity may carry.
pub const ENTITY_PROPERTIES: &[&str] = &[
    "name",
    "entityType",
    "created",
    "created_by",
    "has_embedding",
];

/// V5 leftovers that must never be written again: `timestamp` (replaced by
/// `created_at`), bare `theme` (replaced by `semantic_theme`), inline
/// `observations` arrays on Entity, and the legacy `year_month` Month key.
pub const FORBIDDEN_PROPERTIES: &[&str] = &["timestamp", "theme", "observations", "year_month"];

/// Key formats for the temporal hierarchy.
pub const DAY_KEY_FORMAT: &str = "%Y-%m-%d";
/// Canonical Month key: zero-padded `YYYY-MM`.
pub const MONTH_KEY_FORMAT: &str = "%Y-%m";

/// Raised in strict mode when an item names something outside the registry.
#[derive(Debug, Error)]
pub enum SchemaEnforcementError {
    #[error("unknown entity type '{0}'")]
    UnknownEntityType(String),

    #[error("unknown relationship type '{0}'")]
    UnknownRelationship(String),

    #[error("relationship '{0}' is protected and may only be created by the write pipeline")]
    ProtectedRelationship(String),

    #[error("property '{0}' was removed in the V6 schema")]
    ForbiddenProperty(String),

    #[error("entity name must not be empty")]
    EmptyEntityName,
}

/// An entity as submitted by a tool call, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDraft {
    pub name: String,
    #[serde(rename = "entityType")]
    pub entity_type: String,
    #[serde(default)]
    pub observations: Vec<String>,
}

/// A relationship as submitted to `create_relations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDraft {
    pub from: String,
    #[serde(rename = "type", alias = "relationType")]
    pub rel_type: String,
    pub to: String,
}

/// Result of a lenient validation pass.
#[derive(Debug, Clone)]
pub struct ValidationOutcome<T> {
    pub accepted: Vec<T>,
    /// Per-item rejections: `(index, reason)`. Empty in the happy path.
    pub rejected: Vec<(usize, String)>,
    pub warnings: Vec<String>,
}

pub fn is_canonical_entity_type(entity_type: &str) -> bool {
    ENTITY_TYPES.contains(&entity_type)
}

pub fn is_protected_relationship(rel_type: &str) -> bool {
    PROTECTED_RELATIONSHIPS
        .iter()
        .any(|r| r.eq_ignore_ascii_case(rel_type))
}

pub fn is_allowed_relationship(rel_type: &str) -> bool {
    ALLOWED_RELATIONSHIPS
        .iter()
        .any(|r| r.eq_ignore_ascii_case(rel_type))
}

/// Normalize and validate a batch of entities.
///
/// Entity types are lowercased to their canonical form. In strict mode an
/// unknown type fails the whole call; in lenient mode the item is accepted
/// with a warning. Empty names are always rejected per item.
pub fn validate_entities(
    items: &[EntityDraft],
    strict: bool,
) -> Result<ValidationOutcome<EntityDraft>, SchemaEnforcementError> {
    let mut outcome = ValidationOutcome {
        accepted: Vec::with_capacity(items.len()),
        rejected: Vec::new(),
        warnings: Vec::new(),
    };

    for (index, item) in items.iter().enumerate() {
        if item.name.trim().is_empty() {
            if strict {
                return Err(SchemaEnforcementError::EmptyEntityName);
            }
            outcome
                .rejected
                .push((index, "entity name must not be empty".to_string()));
            continue;
        }

        let entity_type = item.entity_type.trim().to_lowercase();
        if !is_canonical_entity_type(&entity_type) {
            if strict {
                return Err(SchemaEnforcementError::UnknownEntityType(entity_type));
            }
            outcome.warnings.push(format!(
                "entity '{}': type '{}' is not canonical",
                item.name, entity_type
            ));
        }

        outcome.accepted.push(EntityDraft {
            name: item.name.trim().to_string(),
            entity_type,
            observations: item.observations.clone(),
        });
    }

    Ok(outcome)
}

/// Normalize and validate a batch of relationships.
///
/// Protected relationships are rejected per item in both modes: refusing them
/// is the whole point of the split, not a strictness preference. Unknown
/// types warn in lenient mode and fail in strict mode.
pub fn validate_relationships(
    items: &[RelationDraft],
    strict: bool,
) -> Result<ValidationOutcome<RelationDraft>, SchemaEnforcementError> {
    let mut outcome = ValidationOutcome {
        accepted: Vec::with_capacity(items.len()),
        rejected: Vec::new(),
        warnings: Vec::new(),
    };

    for (index, item) in items.iter().enumerate() {
        let rel_type = item.rel_type.trim().to_uppercase();

        if is_protected_relationship(&rel_type) {
            outcome.rejected.push((
                index,
                format!("relationship '{rel_type}' is protected and reserved for the write pipeline"),
            ));
            continue;
        }

        if !is_allowed_relationship(&rel_type) {
            if strict {
                return Err(SchemaEnforcementError::UnknownRelationship(rel_type));
            }
            outcome.warnings.push(format!(
                "relationship '{}' is not canonical ({} -> {})",
                rel_type, item.from, item.to
            ));
        }

        outcome.accepted.push(RelationDraft {
            from: item.from.trim().to_string(),
            rel_type,
            to: item.to.trim().to_string(),
        });
    }

    Ok(outcome)
}

/// Reject any V5 property name appearing in a set of keys to be written.
pub fn check_properties(keys: impl IntoIterator<Item = impl AsRef<str>>) -> Result<(), SchemaEnforcementError> {
    for key in keys {
        let key = key.as_ref();
        if FORBIDDEN_PROPERTIES.iter().any(|f| f.eq_ignore_ascii_case(key)) {
            return Err(SchemaEnforcementError::ForbiddenProperty(key.to_string()));
        }
    }
    Ok(())
}

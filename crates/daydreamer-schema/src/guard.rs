//! Write-guard for operator-supplied Cypher.
//!
//! `raw_cypher_query` is a parameterized pass-through for operational use,
//! not a schema escape hatch. The guard refuses statements that would create
//! pipeline-protected relationships, write V5 properties, or smuggle values
//! into the query text instead of the parameter map.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::registry::PROTECTED_RELATIONSHIPS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GuardViolation {
    #[error("query writes protected relationship '{0}'")]
    ProtectedRelationship(String),

    #[error("query writes V5 property '{0}'")]
    LegacyProperty(String),

    #[error("query text contains string interpolation; pass values via params")]
    Interpolation,
}

// Pattern compiles of literal alternations never fail.
#[allow(clippy::unwrap_used)]
static WRITE_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(CREATE|MERGE|SET|DELETE|DETACH|REMOVE)\b").unwrap());

// Matches `{timestamp: ...}` map entries and `n.theme =` assignments.
#[allow(clippy::unwrap_used)]
static LEGACY_PROPERTY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:[{,]\s*|\.\s*)(timestamp|theme|year_month)\s*[:=][^=]").unwrap());

// Template-literal residue and quoted-string concatenation.
#[allow(clippy::unwrap_used)]
static INTERPOLATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\$\{|['"]\s*\+|\+\s*['"]"#).unwrap());

/// Check a raw Cypher statement before execution.
///
/// Reads pass untouched. A statement with a write clause is refused when it
/// names a protected relationship, writes a V5 property, or interpolates
/// values into the text.
pub fn check_write(query: &str) -> Result<(), GuardViolation> {
    if INTERPOLATION.is_match(query) {
        return Err(GuardViolation::Interpolation);
    }

    if !WRITE_CLAUSE.is_match(query) {
        return Ok(());
    }

    let upper = query.to_uppercase();
    for rel in PROTECTED_RELATIONSHIPS {
        if upper.contains(rel) {
            return Err(GuardViolation::ProtectedRelationship((*rel).to_string()));
        }
    }

    if let Some(captures) = LEGACY_PROPERTY.captures(query) {
        let name = captures
            .get(1)
            .map(|m| m.as_str().to_lowercase())
            .unwrap_or_default();
        return Err(GuardViolation::LegacyProperty(name));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_pass() {
        assert_eq!(
            check_write("MATCH (e:Entity {name: $name}) RETURN e.name"),
            Ok(())
        );
    }

    #[test]
    fn writes_without_protected_names_pass() {
        assert_eq!(
            check_write("MERGE (e:Entity {name: $name}) SET e.created_by = $by"),
            Ok(())
        );
    }

    #[test]
    fn protected_relationship_writes_are_refused() {
        let query = "MATCH (o:Observation),(d:Day) CREATE (o)-[:OCCURRED_ON]->(d)";
        assert_eq!(
            check_write(query),
            Err(GuardViolation::ProtectedRelationship(
                "OCCURRED_ON".to_string()
            ))
        );
    }

    #[test]
    fn v5_observation_shape_is_refused() {
        // V5-style write: bare timestamp + theme plus a protected edge.
        let query =
            "CREATE (o:Observation {timestamp: datetime(), theme:'x'})-[:OCCURRED_ON]->(d:Day)";
        assert!(check_write(query).is_err());
    }

    #[test]
    fn v5_property_without_protected_relationship_is_still_refused() {
        let query = "MATCH (o:Observation {id: $id}) SET o.timestamp = $ts";
        assert_eq!(
            check_write(query),
            Err(GuardViolation::LegacyProperty("timestamp".to_string()))
        );
    }

    #[test]
    fn semantic_theme_is_not_mistaken_for_bare_theme() {
        let query = "MATCH (o:Observation {id: $id}) SET o.semantic_theme = $t";
        assert_eq!(check_write(query), Ok(()));
    }

    #[test]
    fn interpolated_query_text_is_refused() {
        assert_eq!(
            check_write("MATCH (e:Entity {name: '\" + name + \"'}) RETURN e"),
            Err(GuardViolation::Interpolation)
        );
        assert_eq!(
            check_write("MATCH (e:Entity {name: '${name}'}) RETURN e"),
            Err(GuardViolation::Interpolation)
        );
    }

    #[test]
    fn protected_names_in_read_queries_pass() {
        assert_eq!(
            check_write("MATCH (o)-[:OCCURRED_ON]->(d:Day) RETURN d.date"),
            Ok(())
        );
    }
}

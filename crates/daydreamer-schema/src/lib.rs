//! Canonical V6 schema for the DayDreamer graph memory.
//!
//! Everything that writes to the graph resolves names through this crate:
//! entity types, relationship types (including the pipeline-protected
//! temporal relationships), per-node property tables, and the nine semantic
//! themes. The tables are process-wide constants so that validation and
//! reclassification are reproducible across deployments.

pub mod classifier;
pub mod guard;
pub mod registry;

pub use classifier::{THEMES, classify_theme};
pub use guard::{GuardViolation, check_write};
pub use registry::{
    EntityDraft, RelationDraft, SchemaEnforcementError, ValidationOutcome, validate_entities,
    validate_relationships,
};

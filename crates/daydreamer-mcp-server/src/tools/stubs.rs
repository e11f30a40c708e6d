//! Stdio-parity stubs.
//!
//! These tools exist in the desktop stdio deployment. The gateway keeps the
//! names registered so clients see the same tool surface, and answers with a
//! structured pointer instead of fabricating results.

use serde_json::{Value, json};

fn unavailable(tool: &str, alternative: &str) -> Value {
    json!({
        "status": "unavailable",
        "tool": tool,
        "message": format!(
            "{tool} is implemented in the desktop stdio deployment; on this gateway use {alternative}"
        ),
        "implemented_in": "daydreamer desktop (stdio transport)",
    })
}

pub(super) fn conversational_memory_search() -> Value {
    unavailable(
        "conversational_memory_search",
        "search_observations or search_conversations",
    )
}

pub(super) fn virtual_context_search() -> Value {
    unavailable("virtual_context_search", "search_nodes with semantic=true")
}

pub(super) fn lightweight_embodiment() -> Value {
    unavailable("lightweight_embodiment", "memory_stats and search_nodes")
}

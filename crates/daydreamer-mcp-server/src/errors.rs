//! Error taxonomy for the gateway.
//!
//! Subsystems return typed errors; only the MCP dispatcher turns them into
//! JSON-RPC envelopes. Every client-visible failure carries a stable
//! `category` plus a redacted message; full causes stay in the logs.

use thiserror::Error;

/// JSON-RPC error codes used on the wire.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const SERVER_ERROR: i64 = -32000;
    pub const UNAUTHORIZED: i64 = -32003;
}

/// Stable machine-readable categories attached to non-success responses.
pub mod categories {
    pub const VALIDATION: &str = "validation";
    pub const TIMEOUT: &str = "timeout";
    pub const RESOURCE_EXHAUSTED: &str = "resource_exhausted";
    pub const DATABASE: &str = "database";
    pub const DATABASE_UNAVAILABLE: &str = "database_unavailable";
    pub const SCHEMA_VIOLATION: &str = "schema_violation";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const FEATURE_DISABLED: &str = "feature_disabled";
    pub const INTERNAL: &str = "internal";
}

/// Fatal startup and lifecycle errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] figment::Error),

    #[error("transport '{0}' is not supported by this profile; set MCP_TRANSPORT=sse")]
    UnsupportedTransport(String),

    #[error("stdio profile refuses to bind non-loopback address {0}")]
    NonLoopbackStdio(String),

    #[error("invalid bind address: {0}")]
    BindAddress(String),

    #[error("CORS configuration error: {0}")]
    Cors(String),

    #[error("OAuth configuration error: {0}")]
    OAuth(String),

    #[error("logging initialization failed: {0}")]
    Logging(String),

    #[error("tool schema failed to compile: {0}")]
    ToolSchema(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A client-visible tool or protocol error, carried through the JSON-RPC
/// envelope as `{code, message, data: {category}}`.
#[derive(Debug, Clone, Error)]
#[error("{category}: {message}")]
pub struct McpError {
    pub code: i64,
    pub category: &'static str,
    pub message: String,
}

impl McpError {
    pub fn new(code: i64, category: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            category,
            message: message.into(),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            codes::METHOD_NOT_FOUND,
            categories::VALIDATION,
            format!("Method not found: {method}"),
        )
    }

    pub fn tool_not_found(name: &str) -> Self {
        Self::new(
            codes::METHOD_NOT_FOUND,
            categories::VALIDATION,
            format!("Tool {name} not found"),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, categories::VALIDATION, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(codes::SERVER_ERROR, categories::TIMEOUT, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(codes::SERVER_ERROR, categories::RESOURCE_EXHAUSTED, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(codes::SERVER_ERROR, categories::DATABASE, message)
    }

    pub fn database_unavailable() -> Self {
        Self::new(
            codes::SERVER_ERROR,
            categories::DATABASE_UNAVAILABLE,
            "graph database is not reachable",
        )
    }

    pub fn schema_violation(message: impl Into<String>) -> Self {
        Self::new(codes::SERVER_ERROR, categories::SCHEMA_VIOLATION, message)
    }

    pub fn feature_disabled(feature: &str) -> Self {
        Self::new(
            codes::SERVER_ERROR,
            categories::FEATURE_DISABLED,
            format!("{feature} is disabled on this deployment"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::SERVER_ERROR, categories::INTERNAL, message)
    }
}

impl From<daydreamer_schema::SchemaEnforcementError> for McpError {
    fn from(err: daydreamer_schema::SchemaEnforcementError) -> Self {
        Self::schema_violation(err.to_string())
    }
}

impl From<daydreamer_schema::GuardViolation> for McpError {
    fn from(err: daydreamer_schema::GuardViolation) -> Self {
        Self::schema_violation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_attach_stable_categories() {
        assert_eq!(McpError::timeout("db").category, "timeout");
        assert_eq!(
            McpError::resource_exhausted("rss").category,
            "resource_exhausted"
        );
        assert_eq!(McpError::database_unavailable().code, codes::SERVER_ERROR);
        assert_eq!(
            McpError::invalid_params("bad").code,
            codes::INVALID_PARAMS
        );
    }

    #[test]
    fn schema_errors_map_to_schema_violation() {
        let err: McpError =
            daydreamer_schema::SchemaEnforcementError::UnknownEntityType("x".to_string()).into();
        assert_eq!(err.category, categories::SCHEMA_VIOLATION);
        assert_eq!(err.code, codes::SERVER_ERROR);
    }
}

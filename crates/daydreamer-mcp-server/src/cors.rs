//! CORS policy for browser-based MCP clients.
//!
//! An explicit origin allow-list with credentials enabled; there is no
//! wildcard mode because the protected endpoints carry bearer credentials.

use http::Method;
use schemars::JsonSchema;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use url::Url;

use crate::errors::ServerError;

/// CORS configuration options
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CorsConfig {
    /// Enable CORS support
    pub enabled: bool,

    /// List of allowed origins (exact match)
    pub origins: Vec<String>,

    /// Allow credentials in CORS requests
    pub allow_credentials: bool,

    /// Allowed HTTP methods
    pub allow_methods: Vec<String>,

    /// Allowed request headers
    pub allow_headers: Vec<String>,

    /// Max age for preflight cache (in seconds)
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            origins: Vec::new(),
            allow_credentials: true,
            allow_methods: default_methods(),
            allow_headers: default_headers(),
            max_age: Some(default_max_age()),
        }
    }
}

fn default_methods() -> Vec<String> {
    vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()]
}

fn default_headers() -> Vec<String> {
    vec![
        "content-type".to_string(),
        "authorization".to_string(),
        "mcp-session-id".to_string(),
    ]
}

/// Default max age for preflight cache (2 hours)
fn default_max_age() -> u64 {
    7200
}

impl CorsConfig {
    /// Build a CorsLayer from this configuration
    pub fn build_cors_layer(&self) -> Result<CorsLayer, ServerError> {
        if !self.enabled {
            return Err(ServerError::Cors("CORS is not enabled".to_string()));
        }

        self.validate()?;

        let mut origin_list = Vec::with_capacity(self.origins.len());
        for origin in &self.origins {
            let value = origin
                .parse::<http::HeaderValue>()
                .map_err(|e| ServerError::Cors(format!("Invalid origin '{origin}': {e}")))?;
            origin_list.push(value);
        }

        let methods: Result<Vec<Method>, _> = self
            .allow_methods
            .iter()
            .map(|m| m.parse::<Method>())
            .collect();
        let methods = methods.map_err(|e| ServerError::Cors(format!("Invalid HTTP method: {e}")))?;

        let headers: Result<Vec<http::HeaderName>, _> = self
            .allow_headers
            .iter()
            .map(|h| h.parse::<http::HeaderName>())
            .collect();
        let headers = headers.map_err(|e| ServerError::Cors(format!("Invalid header name: {e}")))?;

        let mut cors = CorsLayer::new()
            .allow_origin(origin_list)
            .allow_credentials(self.allow_credentials)
            .allow_methods(methods)
            .allow_headers(headers);

        if let Some(max_age) = self.max_age {
            cors = cors.max_age(std::time::Duration::from_secs(max_age));
        }

        Ok(cors)
    }

    fn validate(&self) -> Result<(), ServerError> {
        if self.origins.is_empty() {
            return Err(ServerError::Cors(
                "Must specify at least one origin when CORS is enabled".to_string(),
            ));
        }

        for origin in &self.origins {
            if origin == "*" {
                return Err(ServerError::Cors(
                    "Wildcard origins are not allowed on a credentialed surface".to_string(),
                ));
            }
            Url::parse(origin)
                .map_err(|e| ServerError::Cors(format!("Invalid origin URL '{origin}': {e}")))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CorsConfig::default();
        assert!(!config.enabled);
        assert!(config.allow_credentials);
        assert_eq!(config.allow_methods, default_methods());
        assert_eq!(config.allow_headers, default_headers());
        assert_eq!(config.max_age, Some(default_max_age()));
    }

    #[test]
    fn test_disabled_cors_fails_to_build() {
        let config = CorsConfig::default();
        assert!(config.build_cors_layer().is_err());
    }

    #[test]
    fn test_specific_origins_build() {
        let config = CorsConfig {
            enabled: true,
            origins: vec![
                "https://claude.ai".to_string(),
                "https://console.anthropic.com".to_string(),
            ],
            ..Default::default()
        };
        assert!(config.build_cors_layer().is_ok());
    }

    #[test]
    fn test_no_origins_fails() {
        let config = CorsConfig {
            enabled: true,
            origins: vec![],
            ..Default::default()
        };
        assert!(config.build_cors_layer().is_err());
    }

    #[test]
    fn test_wildcard_origin_fails() {
        let config = CorsConfig {
            enabled: true,
            origins: vec!["*".to_string()],
            ..Default::default()
        };
        assert!(config.build_cors_layer().is_err());
    }

    #[test]
    fn test_invalid_origin_fails() {
        let config = CorsConfig {
            enabled: true,
            origins: vec!["not-a-valid-url".to_string()],
            ..Default::default()
        };
        assert!(config.build_cors_layer().is_err());
    }

    #[test]
    fn test_invalid_method_fails() {
        let config = CorsConfig {
            enabled: true,
            origins: vec!["https://claude.ai".to_string()],
            allow_methods: vec!["invalid method with spaces".to_string()],
            ..Default::default()
        };
        assert!(config.build_cors_layer().is_err());
    }
}

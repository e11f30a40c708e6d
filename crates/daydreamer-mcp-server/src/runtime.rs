//! Runtime configuration.
//!
//! Configuration is resolved in three layers: built-in defaults, an optional
//! YAML file, then the process environment (`PORT`, `NEO4J_URI`,
//! `OAUTH_JWT_SECRET`, ...). Environment keys map to the lowercased field
//! names, which keeps the deployment surface identical to the hosted
//! profile's dashboard variables.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use schemars::JsonSchema;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cors::CorsConfig;
use crate::errors::ServerError;

pub mod logging;

/// Transport profiles. Only SSE serves the HTTP surface; the stdio profile
/// exists for desktop parity and refuses non-loopback binds.
pub const TRANSPORT_SSE: &str = "sse";
pub const TRANSPORT_STDIO: &str = "stdio";

const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;
const GIB: u64 = 1024 * 1024 * 1024;

fn serialize_secret<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: String = serde::Deserialize::deserialize(deserializer)?;
    Ok(SecretString::from(value))
}

/// The full environment-variable surface of the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    /// TCP port to bind (`PORT`, supplied by the container platform).
    pub port: u16,

    /// Bind address. The stdio profile requires loopback.
    pub address: IpAddr,

    /// Transport profile; must be `sse` for the hosted gateway.
    pub mcp_transport: String,

    /// Bolt URI of the graph database.
    pub neo4j_uri: String,
    pub neo4j_username: String,
    #[serde(serialize_with = "serialize_secret", deserialize_with = "deserialize_secret")]
    #[schemars(with = "String")]
    pub neo4j_password: SecretString,

    /// When true, `/sse`, `/messages` and the tool surface demand a credential.
    pub require_authentication: bool,

    /// Enables discovery, registration, authorize and token endpoints.
    pub oauth_enabled: bool,
    /// Absolute issuer URL stamped into tokens and metadata.
    pub oauth_issuer: String,
    /// Resource URL tokens are minted for. Empty means "same as issuer".
    pub oauth_resource: String,
    /// JWT `exp` offset in seconds.
    pub oauth_token_expiry: u64,
    #[serde(serialize_with = "serialize_secret", deserialize_with = "deserialize_secret")]
    #[schemars(with = "String")]
    pub oauth_jwt_secret: SecretString,

    /// Legacy static bearer credential. Empty disables the mode.
    #[serde(serialize_with = "serialize_secret", deserialize_with = "deserialize_secret")]
    #[schemars(with = "String")]
    pub railway_bearer_token: SecretString,

    pub enable_cors: bool,
    /// Comma-separated origin allow-list.
    pub cors_allowed_origins: String,

    /// Soft per-peer request cap per minute; 0 disables.
    pub rate_limit_per_minute: u32,

    /// Per-call embedding ceiling in seconds (covers first-call model load).
    pub embedding_timeout: u64,
    pub enable_auto_unload: bool,
    pub enable_resource_monitoring: bool,

    pub graphrag_enabled: bool,
    pub graphrag_global_search: bool,
    pub graphrag_local_search: bool,

    /// When true, unknown schema names fail items instead of warning.
    pub schema_enforcement_strict: bool,

    /// Log output format: `text` or `json`.
    pub log_format: String,

    // Operational knobs below keep their hosted-profile defaults and are
    // rarely overridden.
    pub max_sessions: usize,
    pub session_idle_timeout: u64,
    pub session_sweep_interval: u64,
    pub sse_keepalive_interval: u64,
    pub max_body_bytes: usize,
    pub database_timeout: u64,
    pub embedding_cache_capacity: u64,
    pub embedding_memory_threshold_bytes: u64,
    pub embedding_memory_recovery_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            address: IpAddr::from([0, 0, 0, 0]),
            mcp_transport: TRANSPORT_SSE.to_string(),
            neo4j_uri: "bolt://localhost:7687".to_string(),
            neo4j_username: "neo4j".to_string(),
            neo4j_password: SecretString::from(String::new()),
            require_authentication: true,
            oauth_enabled: true,
            oauth_issuer: "http://127.0.0.1:3000".to_string(),
            oauth_resource: String::new(),
            oauth_token_expiry: 3600,
            oauth_jwt_secret: SecretString::from(String::new()),
            railway_bearer_token: SecretString::from(String::new()),
            enable_cors: false,
            cors_allowed_origins: String::new(),
            rate_limit_per_minute: 0,
            embedding_timeout: 40,
            enable_auto_unload: false,
            enable_resource_monitoring: false,
            graphrag_enabled: true,
            graphrag_global_search: true,
            graphrag_local_search: true,
            schema_enforcement_strict: false,
            log_format: "text".to_string(),
            max_sessions: 10,
            session_idle_timeout: 300,
            session_sweep_interval: 60,
            sse_keepalive_interval: 30,
            max_body_bytes: DEFAULT_BODY_LIMIT,
            database_timeout: 30,
            embedding_cache_capacity: 1000,
            embedding_memory_threshold_bytes: 4 * GIB + GIB / 2,
            embedding_memory_recovery_bytes: 4 * GIB,
        }
    }
}

impl Config {
    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Validate the transport profile against the bind address.
    pub fn validate_transport(&self) -> Result<(), ServerError> {
        match self.mcp_transport.as_str() {
            TRANSPORT_SSE => Ok(()),
            TRANSPORT_STDIO if self.address.is_loopback() => Ok(()),
            TRANSPORT_STDIO => Err(ServerError::NonLoopbackStdio(self.address.to_string())),
            other => Err(ServerError::UnsupportedTransport(other.to_string())),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            max_sessions: self.max_sessions.max(1),
            idle_timeout: Duration::from_secs(self.session_idle_timeout),
            sweep_interval: Duration::from_secs(self.session_sweep_interval),
            keepalive: Duration::from_secs(self.sse_keepalive_interval),
        }
    }

    pub fn database_settings(&self) -> DatabaseSettings {
        DatabaseSettings {
            uri: self.neo4j_uri.clone(),
            username: self.neo4j_username.clone(),
            password: self.neo4j_password.clone(),
            timeout: Duration::from_secs(self.database_timeout),
        }
    }

    pub fn embedding_settings(&self) -> EmbeddingSettings {
        EmbeddingSettings {
            timeout: Duration::from_secs(self.embedding_timeout),
            cache_capacity: self.embedding_cache_capacity,
            memory_threshold_bytes: self.embedding_memory_threshold_bytes,
            memory_recovery_bytes: self.embedding_memory_recovery_bytes,
            auto_unload: self.enable_auto_unload,
            resource_monitoring: self.enable_resource_monitoring,
        }
    }

    pub fn graphrag_settings(&self) -> GraphRagSettings {
        GraphRagSettings {
            enabled: self.graphrag_enabled,
            global_search: self.graphrag_global_search,
            local_search: self.graphrag_local_search,
        }
    }

    pub fn oauth_settings(&self) -> Result<OAuthSettings, ServerError> {
        let issuer = Url::parse(&self.oauth_issuer)
            .map_err(|e| ServerError::OAuth(format!("invalid OAUTH_ISSUER: {e}")))?;
        let resource = if self.oauth_resource.is_empty() {
            issuer.clone()
        } else {
            Url::parse(&self.oauth_resource)
                .map_err(|e| ServerError::OAuth(format!("invalid OAUTH_RESOURCE: {e}")))?
        };
        Ok(OAuthSettings {
            enabled: self.oauth_enabled,
            issuer,
            resource,
            token_expiry: self.oauth_token_expiry,
            jwt_secret: self.oauth_jwt_secret.clone(),
        })
    }

    pub fn cors_config(&self) -> CorsConfig {
        CorsConfig {
            enabled: self.enable_cors,
            origins: self
                .cors_allowed_origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect(),
            ..CorsConfig::default()
        }
    }

    pub fn static_bearer(&self) -> Option<SecretString> {
        if self.railway_bearer_token.expose_secret().is_empty() {
            None
        } else {
            Some(self.railway_bearer_token.clone())
        }
    }

    pub fn jwt_secret(&self) -> Option<SecretString> {
        if self.oauth_jwt_secret.expose_secret().is_empty() {
            None
        } else {
            Some(self.oauth_jwt_secret.clone())
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_sessions: usize,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub keepalive: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub uri: String,
    pub username: String,
    pub password: SecretString,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub timeout: Duration,
    pub cache_capacity: u64,
    pub memory_threshold_bytes: u64,
    pub memory_recovery_bytes: u64,
    pub auto_unload: bool,
    pub resource_monitoring: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct GraphRagSettings {
    pub enabled: bool,
    pub global_search: bool,
    pub local_search: bool,
}

#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub enabled: bool,
    pub issuer: Url,
    pub resource: Url,
    pub token_expiry: u64,
    pub jwt_secret: SecretString,
}

/// Read configuration from defaults, a YAML file, then the environment.
pub fn read_config(path: PathBuf) -> Result<Config, ServerError> {
    Ok(Figment::from(Serialized::defaults(Config::default()))
        .merge(Yaml::file(path))
        .merge(Env::raw())
        .extract()?)
}

/// Read configuration from defaults and the environment only.
pub fn read_config_from_env() -> Result<Config, ServerError> {
    Ok(Figment::from(Serialized::defaults(Config::default()))
        .merge(Env::raw())
        .extract()?)
}

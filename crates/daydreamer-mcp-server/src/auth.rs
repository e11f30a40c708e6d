//! Authentication gatekeeper for `/sse`, `/messages` and the tool surface.
//!
//! Two credential modes, either sufficient when both are configured: a
//! locally-minted HS256 JWT, or the legacy static bearer kept for older
//! deployments. Loopback peers get no special treatment; there is no silent
//! bypass. Preflight `OPTIONS` passes through untouched so CORS can answer
//! it.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use url::Url;

use crate::errors::{ServerError, categories};
use crate::runtime::Config;

mod rate_limit;
mod valid_token;
mod www_authenticate;

pub use rate_limit::RateLimiter;
pub use valid_token::{Claims, JwtVerifier};
pub use www_authenticate::WwwAuthenticate;

/// The authenticated caller, inserted into request extensions for handlers
/// and session bookkeeping.
#[derive(Debug, Clone)]
pub struct Principal {
    pub subject: String,
    pub mode: CredentialMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialMode {
    Jwt,
    LegacyBearer,
    Anonymous,
}

/// Resolved gatekeeper state shared by the middleware.
pub struct AuthConfig {
    require_authentication: bool,
    static_bearer: Option<SecretString>,
    jwt: Option<JwtVerifier>,
    rate_limiter: Option<RateLimiter>,
    resource_metadata: Url,
}

impl AuthConfig {
    pub fn from_runtime(config: &Config) -> Result<Self, ServerError> {
        let oauth = config.oauth_settings()?;

        let jwt = config.jwt_secret().map(|secret| {
            JwtVerifier::new(
                secret,
                oauth.issuer.to_string(),
                oauth.resource.to_string(),
            )
        });

        let mut resource_metadata = oauth.resource.clone();
        resource_metadata.set_path("/.well-known/oauth-protected-resource");

        Ok(Self {
            require_authentication: config.require_authentication,
            static_bearer: config.static_bearer(),
            jwt,
            rate_limiter: (config.rate_limit_per_minute > 0)
                .then(|| RateLimiter::new(config.rate_limit_per_minute)),
            resource_metadata,
        })
    }

    fn unauthorized(&self) -> AuthRejection {
        AuthRejection::Unauthorized {
            resource_metadata: self.resource_metadata.clone(),
        }
    }

    fn validate(&self, bearer: &str) -> Option<Principal> {
        if let Some(verifier) = &self.jwt
            && let Ok(claims) = verifier.verify(bearer)
        {
            return Some(Principal {
                subject: claims.sub,
                mode: CredentialMode::Jwt,
            });
        }

        if let Some(expected) = &self.static_bearer
            && expected.expose_secret() == bearer
        {
            return Some(Principal {
                subject: "legacy-bearer".to_string(),
                mode: CredentialMode::LegacyBearer,
            });
        }

        None
    }
}

pub enum AuthRejection {
    Unauthorized { resource_metadata: Url },
    RateLimited,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized { resource_metadata } => (
                StatusCode::UNAUTHORIZED,
                TypedHeader(WwwAuthenticate::Bearer { resource_metadata }),
                Json(json!({
                    "category": categories::UNAUTHORIZED,
                    "message": "missing or invalid credential",
                })),
            )
                .into_response(),
            Self::RateLimited => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "category": categories::RESOURCE_EXHAUSTED,
                    "message": "per-peer rate limit exceeded",
                })),
            )
                .into_response(),
        }
    }
}

/// Gate a request with either credential mode.
#[tracing::instrument(skip_all, fields(status_code, reason))]
pub async fn authenticate(
    State(auth): State<Arc<AuthConfig>>,
    token: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthRejection> {
    // Preflight never carries credentials; CORS answers it.
    if request.method() == Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let peer = peer_identity(&request);

    if let Some(limiter) = &auth.rate_limiter
        && !limiter.allow(&peer)
    {
        tracing::Span::current().record("reason", "rate_limited");
        tracing::Span::current().record("status_code", StatusCode::SERVICE_UNAVAILABLE.as_u16());
        return Err(AuthRejection::RateLimited);
    }

    let principal = match token {
        Some(token) => auth.validate(token.token()).ok_or_else(|| {
            tracing::Span::current().record("reason", "invalid_token");
            tracing::Span::current().record("status_code", StatusCode::UNAUTHORIZED.as_u16());
            auth.unauthorized()
        })?,
        None if auth.require_authentication => {
            tracing::Span::current().record("reason", "missing_token");
            tracing::Span::current().record("status_code", StatusCode::UNAUTHORIZED.as_u16());
            return Err(auth.unauthorized());
        }
        None => Principal {
            subject: peer.clone(),
            mode: CredentialMode::Anonymous,
        },
    };

    request.extensions_mut().insert(principal);

    let response = next.run(request).await;
    tracing::Span::current().record("status_code", response.status().as_u16());
    Ok(response)
}

/// Peer identity for rate limiting and session logging: the first
/// `X-Forwarded-For` hop when the platform router injects one, otherwise the
/// TCP peer address.
pub fn peer_identity(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
    use tower::ServiceExt;

    fn test_config(require: bool) -> Config {
        let mut config = Config::default();
        config.require_authentication = require;
        config.oauth_jwt_secret = SecretString::from("unit-test-secret".to_string());
        config.railway_bearer_token = SecretString::from("legacy-token".to_string());
        config
    }

    fn app(config: &Config) -> Router {
        let auth = Arc::new(AuthConfig::from_runtime(config).unwrap());
        Router::new()
            .route("/test", get(|| async { "ok" }))
            .layer(from_fn_with_state(auth, authenticate))
    }

    fn mint_token(config: &Config, exp_offset: i64) -> String {
        let oauth = config.oauth_settings().unwrap();
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: oauth.issuer.to_string(),
            sub: "client-1".to_string(),
            aud: oauth.resource.to_string(),
            iat: now,
            exp: now + exp_offset,
            jti: "test-jti".to_string(),
            scope: None,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret("unit-test-secret".as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn missing_token_returns_unauthorized_with_resource_metadata() {
        let app = app(&test_config(true));
        let req = HttpRequest::builder()
            .uri("/test")
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let www = res
            .headers()
            .get(WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(www.contains("Bearer"));
        assert!(www.contains("resource_metadata"));
    }

    #[tokio::test]
    async fn valid_jwt_is_accepted() {
        let config = test_config(true);
        let token = mint_token(&config, 3600);
        let req = HttpRequest::builder()
            .uri("/test")
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let res = app(&config).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn expired_jwt_is_rejected() {
        let config = test_config(true);
        let token = mint_token(&config, -30);
        let req = HttpRequest::builder()
            .uri("/test")
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let res = app(&config).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn static_bearer_is_accepted_as_fallback_mode() {
        let config = test_config(true);
        let req = HttpRequest::builder()
            .uri("/test")
            .header(AUTHORIZATION, "Bearer legacy-token")
            .body(Body::empty())
            .unwrap();
        let res = app(&config).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_static_bearer_is_rejected() {
        let config = test_config(true);
        let req = HttpRequest::builder()
            .uri("/test")
            .header(AUTHORIZATION, "Bearer wrong-token")
            .body(Body::empty())
            .unwrap();
        let res = app(&config).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn open_mode_admits_anonymous_requests() {
        let config = test_config(false);
        let req = HttpRequest::builder()
            .uri("/test")
            .body(Body::empty())
            .unwrap();
        let res = app(&config).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rate_limit_returns_service_unavailable() {
        let mut config = test_config(false);
        config.rate_limit_per_minute = 2;
        let app = app(&config);
        for _ in 0..2 {
            let req = HttpRequest::builder()
                .uri("/test")
                .header("x-forwarded-for", "203.0.113.9")
                .body(Body::empty())
                .unwrap();
            let res = app.clone().oneshot(req).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
        let req = HttpRequest::builder()
            .uri("/test")
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

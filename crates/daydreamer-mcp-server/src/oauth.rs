//! OAuth 2.1 authorization server.
//!
//! Zero out-of-band configuration: clients discover the endpoints through
//! RFC 8414 metadata, register themselves through RFC 7591, and complete a
//! PKCE-S256 authorization-code flow. Tokens are HS256 JWTs validated
//! statelessly by the gatekeeper.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use crate::runtime::OAuthSettings;

pub mod jwt;
pub mod pkce;
pub mod store;

use store::{CODE_TTL_SECONDS, CodeRecord, OAuthStore, redirect_uri_allowed};

pub struct OAuthServer {
    settings: OAuthSettings,
    store: OAuthStore,
}

impl OAuthServer {
    pub fn new(settings: OAuthSettings) -> Self {
        Self {
            settings,
            store: OAuthStore::new(),
        }
    }

    /// Discovery, registration, authorize and token routes.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route(
                "/.well-known/oauth-authorization-server",
                get(authorization_server_metadata),
            )
            .route(
                "/.well-known/oauth-protected-resource",
                get(protected_resource_metadata),
            )
            .route("/register", post(register))
            .route("/authorize", get(authorize))
            .route("/token", post(token))
            .with_state(self)
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.settings.issuer.clone();
        url.set_path(path);
        url.set_query(None);
        url
    }
}

/// RFC 6749 §5.2-shaped error body.
#[derive(Debug)]
pub struct OAuthError {
    status: StatusCode,
    error: &'static str,
    description: String,
}

impl OAuthError {
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: "invalid_request",
            description: description.into(),
        }
    }

    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            error: "invalid_client",
            description: description.into(),
        }
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: "invalid_grant",
            description: description.into(),
        }
    }

    pub fn invalid_redirect_uri(description: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: "invalid_redirect_uri",
            description: description.into(),
        }
    }

    pub fn unsupported_grant_type() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: "unsupported_grant_type",
            description: "only authorization_code is supported".to_string(),
        }
    }

    pub fn server_error(description: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: "server_error",
            description: description.into(),
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": self.error,
                "error_description": self.description,
            })),
        )
            .into_response()
    }
}

async fn authorization_server_metadata(State(server): State<Arc<OAuthServer>>) -> Json<serde_json::Value> {
    Json(json!({
        "issuer": server.settings.issuer,
        "authorization_endpoint": server.endpoint("/authorize"),
        "token_endpoint": server.endpoint("/token"),
        "registration_endpoint": server.endpoint("/register"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code"],
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": ["client_secret_post", "none"],
        "scopes_supported": ["mcp"],
    }))
}

async fn protected_resource_metadata(State(server): State<Arc<OAuthServer>>) -> Json<serde_json::Value> {
    Json(json!({
        "resource": server.settings.resource,
        "authorization_servers": [server.settings.issuer],
        "bearer_methods_supported": ["header"],
        "scopes_supported": ["mcp"],
    }))
}

#[derive(Debug, Deserialize)]
struct RegistrationRequest {
    #[serde(default)]
    redirect_uris: Vec<String>,
    client_name: Option<String>,
    scope: Option<String>,
}

/// RFC 7591 dynamic client registration.
#[tracing::instrument(skip_all)]
async fn register(
    State(server): State<Arc<OAuthServer>>,
    Json(request): Json<RegistrationRequest>,
) -> Result<Response, OAuthError> {
    if request.redirect_uris.is_empty() {
        return Err(OAuthError::invalid_redirect_uri(
            "redirect_uris must contain at least one URI",
        ));
    }

    for uri in &request.redirect_uris {
        if !redirect_uri_allowed(uri) {
            return Err(OAuthError::invalid_redirect_uri(format!(
                "redirect URI '{uri}' must be HTTPS (or HTTP on localhost)"
            )));
        }
    }

    let record = server.store.register_client(request.redirect_uris);
    info!(client_id = %record.client_id, "registered OAuth client");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "client_id": record.client_id,
            "client_secret": record.client_secret,
            "client_id_issued_at": record.created_at,
            "redirect_uris": record.redirect_uris,
            "grant_types": ["authorization_code"],
            "response_types": ["code"],
            "token_endpoint_auth_method": record.token_endpoint_auth_method,
            "client_name": record.client_name_or_default(request.client_name),
            "scope": request.scope,
        })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct AuthorizeParams {
    response_type: Option<String>,
    client_id: String,
    redirect_uri: String,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
    state: Option<String>,
    scope: Option<String>,
}

/// PKCE-protected authorization endpoint. Errors that predate redirect-URI
/// validation return 400; later errors redirect back to the client.
#[tracing::instrument(skip_all, fields(client_id = %params.client_id))]
async fn authorize(
    State(server): State<Arc<OAuthServer>>,
    Query(params): Query<AuthorizeParams>,
) -> Result<Response, OAuthError> {
    let client = server
        .store
        .client(&params.client_id)
        .ok_or_else(|| OAuthError::invalid_request("unknown client_id"))?;

    if !client.redirect_uris.iter().any(|u| u == &params.redirect_uri) {
        return Err(OAuthError::invalid_request(
            "redirect_uri does not match the registration",
        ));
    }

    let redirect = |query: &[(&str, &str)]| -> Result<Response, OAuthError> {
        let mut target = Url::parse(&params.redirect_uri)
            .map_err(|_| OAuthError::invalid_request("redirect_uri is not a valid URL"))?;
        {
            let mut pairs = target.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
            if let Some(state) = &params.state {
                pairs.append_pair("state", state);
            }
        }
        Ok((
            StatusCode::FOUND,
            [(header::LOCATION, target.to_string())],
        )
            .into_response())
    };

    if params.response_type.as_deref() != Some("code") {
        return redirect(&[("error", "unsupported_response_type")]);
    }

    let challenge = params.code_challenge.as_deref().unwrap_or_default();
    if challenge.is_empty() || params.code_challenge_method.as_deref() != Some("S256") {
        return redirect(&[(
            "error",
            "invalid_request",
        ), (
            "error_description",
            "PKCE with code_challenge_method=S256 is required",
        )]);
    }

    let code = server.store.issue_code(CodeRecord {
        client_id: client.client_id.clone(),
        redirect_uri: params.redirect_uri.clone(),
        code_challenge: challenge.to_string(),
        scope: params.scope.clone(),
        expires_at: chrono::Utc::now().timestamp() + CODE_TTL_SECONDS,
    });

    debug!(client_id = %client.client_id, "issued authorization code");
    redirect(&[("code", code.as_str())])
}

#[derive(Debug, Default, Deserialize)]
struct TokenRequest {
    grant_type: Option<String>,
    code: Option<String>,
    redirect_uri: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    code_verifier: Option<String>,
}

/// Code-for-token exchange. Accepts form or JSON bodies.
#[tracing::instrument(skip_all)]
async fn token(
    State(server): State<Arc<OAuthServer>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<jwt::TokenResponse>, OAuthError> {
    let request = parse_token_request(&headers, &body)?;

    if request.grant_type.as_deref() != Some("authorization_code") {
        return Err(OAuthError::unsupported_grant_type());
    }

    let code = request
        .code
        .ok_or_else(|| OAuthError::invalid_request("code is required"))?;
    let redirect_uri = request
        .redirect_uri
        .ok_or_else(|| OAuthError::invalid_request("redirect_uri is required"))?;
    let client_id = request
        .client_id
        .ok_or_else(|| OAuthError::invalid_request("client_id is required"))?;
    let code_verifier = request
        .code_verifier
        .ok_or_else(|| OAuthError::invalid_request("code_verifier is required"))?;

    // Single use: the record is gone after this lookup, success or not.
    let record = server
        .store
        .consume_code(&code)
        .ok_or_else(|| OAuthError::invalid_grant("code is invalid, expired, or already redeemed"))?;

    if record.client_id != client_id || record.redirect_uri != redirect_uri {
        return Err(OAuthError::invalid_grant(
            "code was issued to a different client or redirect_uri",
        ));
    }

    if let Some(client) = server.store.client(&client_id)
        && let Some(secret) = &request.client_secret
        && secret != &client.client_secret
    {
        return Err(OAuthError::invalid_client("client_secret mismatch"));
    }

    if !pkce::verify_s256(&code_verifier, &record.code_challenge) {
        return Err(OAuthError::invalid_grant("PKCE verification failed"));
    }

    info!(client_id = %client_id, "issued access token");
    jwt::mint(&server.settings, &client_id, record.scope).map(Json)
}

fn parse_token_request(headers: &HeaderMap, body: &Bytes) -> Result<TokenRequest, OAuthError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if content_type.starts_with("application/json") {
        return serde_json::from_slice(body)
            .map_err(|e| OAuthError::invalid_request(format!("invalid JSON body: {e}")));
    }

    let mut request = TokenRequest::default();
    for (key, value) in url::form_urlencoded::parse(body) {
        let value = value.into_owned();
        match key.as_ref() {
            "grant_type" => request.grant_type = Some(value),
            "code" => request.code = Some(value),
            "redirect_uri" => request.redirect_uri = Some(value),
            "client_id" => request.client_id = Some(value),
            "client_secret" => request.client_secret = Some(value),
            "code_verifier" => request.code_verifier = Some(value),
            _ => {}
        }
    }
    Ok(request)
}

impl store::ClientRecord {
    fn client_name_or_default(&self, requested: Option<String>) -> String {
        requested.unwrap_or_else(|| format!("MCP client {}", self.client_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn settings() -> OAuthSettings {
        OAuthSettings {
            enabled: true,
            issuer: Url::parse("http://127.0.0.1:3000").unwrap(),
            resource: Url::parse("http://127.0.0.1:3000").unwrap(),
            token_expiry: 3600,
            jwt_secret: SecretString::from("oauth-test-secret".to_string()),
        }
    }

    #[test]
    fn endpoints_are_rooted_at_the_issuer() {
        let server = OAuthServer::new(settings());
        assert_eq!(
            server.endpoint("/authorize").as_str(),
            "http://127.0.0.1:3000/authorize"
        );
    }

    #[test]
    fn form_bodies_parse() {
        let body = Bytes::from_static(
            b"grant_type=authorization_code&code=abc&redirect_uri=https%3A%2F%2Fclaude.ai%2Fcb&client_id=ddm_1&code_verifier=ver",
        );
        let request = parse_token_request(&HeaderMap::new(), &body).unwrap();
        assert_eq!(request.grant_type.as_deref(), Some("authorization_code"));
        assert_eq!(request.redirect_uri.as_deref(), Some("https://claude.ai/cb"));
    }

    #[test]
    fn json_bodies_parse() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "application/json".parse().unwrap(),
        );
        let body = Bytes::from_static(
            br#"{"grant_type":"authorization_code","code":"abc","redirect_uri":"https://claude.ai/cb","client_id":"ddm_1","code_verifier":"ver"}"#,
        );
        let request = parse_token_request(&headers, &body).unwrap();
        assert_eq!(request.code.as_deref(), Some("abc"));
    }
}

//! Access-token minting.

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use secrecy::ExposeSecret;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::Claims;
use crate::runtime::OAuthSettings;

use super::OAuthError;

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Mint an HS256 access token for a client. Stateless: validation needs only
/// the shared secret, and `jti` exists for optional revocation tooling.
pub fn mint(
    settings: &OAuthSettings,
    client_id: &str,
    scope: Option<String>,
) -> Result<TokenResponse, OAuthError> {
    let now = chrono::Utc::now().timestamp();
    let expires_in = settings.token_expiry;

    let claims = Claims {
        iss: settings.issuer.to_string(),
        sub: client_id.to_string(),
        aud: settings.resource.to_string(),
        iat: now,
        exp: now + expires_in as i64,
        jti: Uuid::new_v4().to_string(),
        scope: scope.clone(),
    };

    let access_token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(settings.jwt_secret.expose_secret().as_bytes()),
    )
    .map_err(|e| OAuthError::server_error(format!("token signing failed: {e}")))?;

    Ok(TokenResponse {
        access_token,
        token_type: "Bearer",
        expires_in,
        scope,
    })
}

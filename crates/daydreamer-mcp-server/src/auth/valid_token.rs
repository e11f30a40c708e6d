//! Local HS256 token verification.
//!
//! The gateway mints its own access tokens, so verification is a local
//! signature check plus the five required claims. There is no networked
//! key fetch.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Access-token claims. All fields except `scope` are required; a token
/// missing any of them fails verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

pub struct JwtVerifier {
    secret: SecretString,
    issuer: String,
    audience: String,
}

impl JwtVerifier {
    pub fn new(secret: SecretString, issuer: String, audience: String) -> Self {
        Self {
            secret,
            issuer,
            audience,
        }
    }

    /// Verify signature, expiry (strictly in the future), issuer and
    /// audience. `iat` and `jti` presence is enforced by the claims shape.
    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);
        validation.leeway = 0;

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.expose_secret().as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
    }
}

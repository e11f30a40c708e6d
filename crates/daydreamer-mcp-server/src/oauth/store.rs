//! In-memory client and authorization-code stores.
//!
//! Registrations live for the life of the process; lookups are O(1). Codes
//! are single-use: redemption removes the record before any further check
//! runs, so a replayed code can never race its first exchange.

use std::collections::HashMap;
use std::sync::RwLock;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use url::Url;

/// Authorization codes expire after ten minutes.
pub const CODE_TTL_SECONDS: i64 = 600;

#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uris: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct CodeRecord {
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub scope: Option<String>,
    pub expires_at: i64,
}

#[derive(Default)]
pub struct OAuthStore {
    clients: RwLock<HashMap<String, ClientRecord>>,
    codes: RwLock<HashMap<String, CodeRecord>>,
}

impl OAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registration with generated credentials.
    pub fn register_client(&self, redirect_uris: Vec<String>) -> ClientRecord {
        let record = ClientRecord {
            client_id: format!("ddm_{}", random_token(16)),
            client_secret: random_token(32),
            redirect_uris,
            token_endpoint_auth_method: "client_secret_post".to_string(),
            created_at: chrono::Utc::now().timestamp(),
        };
        write_lock(&self.clients).insert(record.client_id.clone(), record.clone());
        record
    }

    pub fn client(&self, client_id: &str) -> Option<ClientRecord> {
        read_lock(&self.clients).get(client_id).cloned()
    }

    /// Issue a fresh single-use authorization code.
    pub fn issue_code(&self, record: CodeRecord) -> String {
        let code = random_token(32);
        write_lock(&self.codes).insert(code.clone(), record);
        code
    }

    /// Remove and return the code record. A second call for the same code
    /// returns `None` regardless of the first exchange's outcome.
    pub fn consume_code(&self, code: &str) -> Option<CodeRecord> {
        let mut codes = write_lock(&self.codes);
        let record = codes.remove(code)?;
        if record.expires_at < chrono::Utc::now().timestamp() {
            return None;
        }
        Some(record)
    }

    pub fn client_count(&self) -> usize {
        read_lock(&self.clients).len()
    }
}

/// `bytes` of OS randomness, base64url-encoded. 32 bytes gives the 256 bits
/// the client-secret contract requires.
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Redirect URIs must be HTTPS; plain HTTP is allowed only for loopback
/// development clients, on any port.
pub fn redirect_uri_allowed(uri: &str) -> bool {
    let Ok(url) = Url::parse(uri) else {
        return false;
    };
    match url.scheme() {
        "https" => true,
        "http" => matches!(url.host_str(), Some("localhost" | "127.0.0.1")),
        _ => false,
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

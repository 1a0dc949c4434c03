//
// Storage façade (A)
//
// A deliberately narrow trait: `Create`/`Get`/`Update`/`Delete` per entity
// plus `update_*` helpers that accept a pure `old -> new` closure and retry
// on optimistic-concurrency conflict (spec §6/§5). Storage owns all durable
// state; every other component holds, at most, a transient in-memory cache
// of what storage last told it (§5 "shared resource policy").
//
// Grounded conceptually on the teacher's `db_object!`/`db_run!` multi-backend
// pattern in `db/mod.rs` and `db/models/auth_request.rs` — generalized from
// a diesel-backed macro to a plain async trait, since persistence is a
// pluggable non-goal here rather than a shipped multi-backend ORM.
//
pub mod memory;

use crate::error::{ApiResult, Error};

/// A pure transform applied by `update_*`; storage may invoke it more than
/// once if it needs to retry after a concurrent write changed the record.
pub type UpdateFn<T> = Box<dyn Fn(T) -> ApiResult<T> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub username: String,
    pub preferred_username: String,
    pub email: String,
    pub email_verified: bool,
    pub groups: Vec<String>,
}

impl Default for Claims {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            username: String::new(),
            preferred_username: String::new(),
            email: String::new(),
            email_verified: false,
            groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Client {
    pub id: String,
    /// Argon2id PHC hash of the client secret. `None` for public clients.
    pub secret_hash: Option<String>,
    pub public: bool,
    pub redirect_uris: Vec<String>,
    /// Cross-client audience peers: client ids allowed to request
    /// `audience:server:client_id:<this id>` scopes.
    pub trusted_peers: Vec<String>,
    pub name: String,
    pub logo_url: Option<String>,
    pub allow_password_grant: bool,
    pub skip_approval_screen: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AuthRequest {
    pub id: String,
    pub client_id: String,
    pub response_types: Vec<String>,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    pub nonce: Option<String>,
    pub state: Option<String>,
    pub force_approval: bool,
    pub expiry: i64,
    pub logged_in: bool,
    pub connector_id: Option<String>,
    pub connector_data: Option<Vec<u8>>,
    pub claims: Option<Claims>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub hmac_key: Vec<u8>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AuthCode {
    pub id: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub nonce: Option<String>,
    pub redirect_uri: String,
    pub claims: Claims,
    pub connector_id: String,
    pub connector_data: Option<Vec<u8>>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub expiry: i64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RefreshToken {
    pub id: String,
    /// Current opaque secret. Compared via `crypto::ct_eq`, never hashed:
    /// the secret itself is already 256 bits of CSPRNG output (Design Note
    /// "opaque tokens as {id, secret} envelopes").
    pub token: String,
    pub obsolete_token: Option<String>,
    pub last_used: i64,
    pub created_at: i64,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub nonce: Option<String>,
    pub claims: Claims,
    pub connector_id: String,
    pub connector_data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RefreshRef {
    pub id: String,
    pub client_id: String,
    pub created_at: i64,
    pub last_used: i64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OfflineSession {
    pub user_id: String,
    pub connector_id: String,
    pub refresh: std::collections::HashMap<String, RefreshRef>,
    pub connector_data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DeviceTokenStatus {
    Pending,
    Complete,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeviceRequest {
    pub user_code: String,
    pub device_code: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub expiry: i64,
    pub poll_interval: i64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeviceToken {
    pub device_code: String,
    pub status: DeviceTokenStatus,
    pub token_response: Option<serde_json::Value>,
    pub last_request: i64,
    pub poll_interval: i64,
    pub expiry: i64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VerificationKey {
    pub kid: String,
    pub public_jwk: serde_json::Value,
    pub expiry: i64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Keys {
    pub kid: String,
    /// PKCS#8 DER of the current signing key.
    pub signing_key_der: Vec<u8>,
    pub signing_key_pub: serde_json::Value,
    pub verification_keys: Vec<VerificationKey>,
    pub next_rotation: i64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Connector {
    pub id: String,
    pub connector_type: String,
    pub name: String,
    pub resource_version: u64,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Password {
    pub email: String,
    pub username: String,
    pub user_id: String,
    pub bcrypt_hash: String,
}

/// Transactional persistence of clients, auth requests, codes, refresh
/// tokens, offline sessions, keys, connectors, passwords and devices
/// (spec §2, component A). Implementations only need to guarantee
/// linearizable CAS per record (`update_*`); cross-record transactions are
/// not required since every state transition in this crate touches exactly
/// one record (the one exception, refresh rotation + offline-session
/// update, tolerates the session update losing a race: see `refresh.rs`).
#[rocket::async_trait]
pub trait Storage: Send + Sync {
    async fn create_client(&self, client: Client) -> ApiResult<()>;
    async fn get_client(&self, id: &str) -> ApiResult<Client>;
    async fn update_client(&self, id: &str, f: UpdateFn<Client>) -> ApiResult<Client>;
    async fn delete_client(&self, id: &str) -> ApiResult<()>;

    async fn create_auth_request(&self, req: AuthRequest) -> ApiResult<()>;
    async fn get_auth_request(&self, id: &str) -> ApiResult<AuthRequest>;
    async fn update_auth_request(&self, id: &str, f: UpdateFn<AuthRequest>) -> ApiResult<AuthRequest>;
    async fn delete_auth_request(&self, id: &str) -> ApiResult<()>;
    async fn gc_auth_requests(&self, now: i64) -> ApiResult<u64>;

    async fn create_auth_code(&self, code: AuthCode) -> ApiResult<()>;
    async fn get_auth_code(&self, id: &str) -> ApiResult<AuthCode>;
    async fn delete_auth_code(&self, id: &str) -> ApiResult<()>;

    /// Loads and deletes in one step (spec §4.5: "Load code; delete
    /// atomically; fail with `invalid_grant` if missing"). The default
    /// implementation is get-then-delete, which is atomic enough for any
    /// backend that serializes per-key writes (including `storage::memory`'s
    /// per-row mutex); a backend without that guarantee should override this
    /// with a single `DELETE ... RETURNING`-style statement.
    async fn take_auth_code(&self, id: &str) -> ApiResult<AuthCode> {
        let code = self.get_auth_code(id).await?;
        self.delete_auth_code(id).await?;
        Ok(code)
    }

    async fn create_refresh_token(&self, token: RefreshToken) -> ApiResult<()>;
    async fn get_refresh_token(&self, id: &str) -> ApiResult<RefreshToken>;
    async fn update_refresh_token(&self, id: &str, f: UpdateFn<RefreshToken>) -> ApiResult<RefreshToken>;
    async fn delete_refresh_token(&self, id: &str) -> ApiResult<()>;

    async fn get_or_create_offline_session(&self, user_id: &str, connector_id: &str) -> ApiResult<OfflineSession>;
    async fn update_offline_session(&self, user_id: &str, connector_id: &str, f: UpdateFn<OfflineSession>) -> ApiResult<OfflineSession>;
    async fn gc_offline_sessions(&self, now: i64) -> ApiResult<u64>;

    async fn create_device_request(&self, req: DeviceRequest) -> ApiResult<()>;
    async fn get_device_request_by_user_code(&self, user_code: &str) -> ApiResult<DeviceRequest>;
    async fn delete_device_request(&self, device_code: &str) -> ApiResult<()>;
    async fn gc_device_requests(&self, now: i64) -> ApiResult<u64>;

    async fn create_device_token(&self, token: DeviceToken) -> ApiResult<()>;
    async fn get_device_token(&self, device_code: &str) -> ApiResult<DeviceToken>;
    async fn update_device_token(&self, device_code: &str, f: UpdateFn<DeviceToken>) -> ApiResult<DeviceToken>;
    async fn delete_device_token(&self, device_code: &str) -> ApiResult<()>;

    async fn get_keys(&self) -> ApiResult<Option<Keys>>;
    async fn update_keys(&self, f: UpdateFn<Option<Keys>>) -> ApiResult<Keys>;

    async fn create_connector(&self, connector: Connector) -> ApiResult<()>;
    async fn get_connector(&self, id: &str) -> ApiResult<Connector>;
    async fn update_connector(&self, id: &str, f: UpdateFn<Connector>) -> ApiResult<Connector>;
    async fn delete_connector(&self, id: &str) -> ApiResult<()>;
    async fn list_connectors(&self) -> ApiResult<Vec<Connector>>;

    async fn create_password(&self, password: Password) -> ApiResult<()>;
    async fn get_password(&self, email: &str) -> ApiResult<Password>;
}

pub fn not_found(what: &str) -> Error {
    Error::not_found(what)
}

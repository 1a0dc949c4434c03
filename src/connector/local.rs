//
// Built-in local-password connector: the one `PasswordConnector` that reads
// and writes `storage::Password` records directly, bcrypt-hashed via
// `secrets::hash_password`/`verify_password` (spec §3's bcrypt addition).
// Where `mock` fakes an upstream IdP from inline config, `local` *is* the
// upstream — it owns the password store rather than just exercising the
// capability contract against it, so registering it gives that storage
// trait and its hashing helpers a real caller instead of leaving them
// plumbed but unused.
//
use serde_json::Value;

use super::{ConnectorInstance, GroupsConnector, Identity, PasswordConnector};
use crate::{
    error::ApiResult,
    secrets,
    storage::{Password, Storage},
};

struct Local {
    storage: std::sync::Arc<dyn Storage>,
}

impl Local {
    fn identity_for(password: &Password) -> Identity {
        Identity {
            user_id: password.user_id.clone(),
            username: password.username.clone(),
            preferred_username: password.username.clone(),
            email: password.email.clone(),
            email_verified: true,
            groups: Vec::new(),
            connector_data: password.email.as_bytes().to_vec(),
        }
    }
}

#[rocket::async_trait]
impl PasswordConnector for Local {
    async fn login(&self, _scopes: &[String], username: &str, password: &str) -> ApiResult<Option<Identity>> {
        let record = match self.storage.get_password(username).await {
            Ok(record) => record,
            Err(_) => return Ok(None),
        };
        if secrets::verify_password(password, &record.bcrypt_hash)? {
            Ok(Some(Self::identity_for(&record)))
        } else {
            Ok(None)
        }
    }
}

#[rocket::async_trait]
impl GroupsConnector for Local {
    async fn groups(&self, _identity: &Identity) -> ApiResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Registers a user directly against the local password store, hashing the
/// plaintext with `secrets::hash_password` before it ever reaches `Storage`.
/// Exposed for the registration surface / tests rather than any connector
/// config key, since `local`'s user set is storage-backed, not inline JSON
/// like `mock`'s.
pub async fn register_user(storage: &dyn Storage, email: &str, username: &str, user_id: &str, plaintext_password: &str) -> ApiResult<()> {
    let bcrypt_hash = secrets::hash_password(plaintext_password)?;
    storage.create_password(Password { email: email.to_string(), username: username.to_string(), user_id: user_id.to_string(), bcrypt_hash }).await
}

pub fn build(storage: std::sync::Arc<dyn Storage>) -> ConnectorInstance {
    let local = std::sync::Arc::new(Local { storage });
    ConnectorInstance { id: String::new(), callback: None, password: Some(local.clone()), saml: None, refresh: None, token_identity: None, groups: Some(local) }
}

/// `ConnectorFactory` signature requires `Fn(&Value) -> ApiResult<ConnectorInstance>`
/// with no access to the registry's storage handle, so `local` is registered
/// with storage bound at `ConnectorRegistry::new` time rather than through
/// the generic factory map the way `mock` is (see `ConnectorRegistry::new`).
pub fn factory(storage: std::sync::Arc<dyn Storage>) -> super::ConnectorFactory {
    std::sync::Arc::new(move |_config: &Value| Ok(build(storage.clone())))
}

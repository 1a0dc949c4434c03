//
// Token-bundle assembly: the `{access_token, id_token, [refresh_token]}`
// JSON body shared by every grant in the token endpoint (F) and by the
// device flow's browser-side completion (H), which mints tokens directly
// rather than handing the device client an authorization code it has no
// secure place to hold (spec §4.5/§4.4, RFC 8628 §3.3).
//
use std::sync::Arc;

use serde_json::{json, Value};

use crate::{
    config::CONFIG,
    error::ApiResult,
    keys::KeyManager,
    refresh,
    storage::{Claims, Storage},
    token::TokenSigner,
};

/// Signs the `{access_token, id_token}` pair only. Used directly by callers
/// that already hold (or explicitly don't want) a refresh token — the
/// refresh grant rotates its own handle via `refresh::redeem` and would
/// otherwise get a second, orphaned one from `mint`'s auto-issue below.
#[allow(clippy::too_many_arguments)]
pub async fn sign(
    keys: &KeyManager,
    client_id: &str,
    audience: Vec<String>,
    azp: Option<String>,
    scopes: &[String],
    nonce: Option<String>,
    claims: &Claims,
    connector_id: &str,
) -> ApiResult<Value> {
    let signer = TokenSigner::new(keys);
    let sub = crate::token::subject_for(&claims.user_id, connector_id);
    let access_token = signer.sign_access_token(&sub, audience.clone(), scopes, client_id, claims).await?;
    let federated_claims = json!({ "connector_id": connector_id });
    let id_token = signer.sign_id_token(&sub, audience, azp, nonce, claims, Some(&access_token), Some(federated_claims)).await?;

    Ok(json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": CONFIG.access_token_lifetime_secs(),
        "id_token": id_token,
        "scope": scopes.join(" "),
    }))
}

/// `sign` plus, when `offline_access` was granted, a freshly issued refresh
/// token (spec §4.5: authorization_code and password grants mint one from
/// scratch; the refresh grant instead calls `sign` directly and attaches the
/// handle `refresh::redeem` already rotated).
#[allow(clippy::too_many_arguments)]
pub async fn mint(
    keys: &KeyManager,
    storage: &Arc<dyn Storage>,
    client_id: &str,
    audience: Vec<String>,
    azp: Option<String>,
    scopes: &[String],
    nonce: Option<String>,
    claims: &Claims,
    connector_id: &str,
    connector_data: Option<Vec<u8>>,
) -> ApiResult<Value> {
    let mut body = sign(keys, client_id, audience, azp, scopes, nonce.clone(), claims, connector_id).await?;

    if scopes.iter().any(|s| s == "offline_access") {
        let handle = refresh::issue(storage, client_id, scopes, nonce, claims.clone(), connector_id, connector_data).await?;
        body["refresh_token"] = json!(handle.format());
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    fn sample_claims() -> Claims {
        Claims { user_id: "u1".into(), username: "alice".into(), preferred_username: "alice".into(), email: "alice@example.com".into(), email_verified: true, groups: vec![] }
    }

    #[tokio::test]
    async fn sign_omits_refresh_token() {
        let keys = KeyManager::new(Arc::new(MemoryStorage::new()));
        let body = sign(&keys, "client-a", vec!["client-a".into()], None, &["openid".into()], None, &sample_claims(), "mock").await.unwrap();
        assert!(body.get("access_token").is_some());
        assert!(body.get("id_token").is_some());
        assert!(body.get("refresh_token").is_none());
        assert_eq!(body["token_type"], "Bearer");
    }

    #[tokio::test]
    async fn mint_without_offline_access_omits_refresh_token() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let keys = KeyManager::new(storage.clone());
        let body = mint(&keys, &storage, "client-a", vec!["client-a".into()], None, &["openid".into()], None, &sample_claims(), "mock", None).await.unwrap();
        assert!(body.get("refresh_token").is_none());
    }

    #[tokio::test]
    async fn mint_with_offline_access_issues_a_refresh_token() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let keys = KeyManager::new(storage.clone());
        let scopes = vec!["openid".to_string(), "offline_access".to_string()];
        let body = mint(&keys, &storage, "client-a", vec!["client-a".into()], None, &scopes, None, &sample_claims(), "mock", None).await.unwrap();
        let refresh_token = body.get("refresh_token").and_then(Value::as_str).expect("refresh_token present");
        assert!(refresh_token.contains('.'));
    }
}

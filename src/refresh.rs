//
// Refresh-token policy (G)
//
// Opaque `{id}.{secret}` envelopes (spec §9 Design Notes): the `id` names the
// stored record, the `secret` is compared with `crypto::ct_eq` so a failed
// lookup and a wrong secret are indistinguishable on the wire (spec §7).
// Rotation reissues both halves; the previous secret stays valid for a short
// grace window so a client that never saw the rotated response (lost
// response, retried request) isn't permanently locked out, while a genuine
// replay past the window is treated as token theft (spec §4.5, §8).
//
use std::sync::Arc;

use crate::{
    config::CONFIG,
    connector::{ConnectorRegistry, Identity},
    crypto,
    error::{ApiResult, Error},
    storage::{Claims, RefreshRef, RefreshToken, Storage},
    util::now_secs,
};

pub struct RefreshHandle {
    pub id: String,
    pub secret: String,
}

impl RefreshHandle {
    pub fn format(&self) -> String {
        format!("{}.{}", self.id, self.secret)
    }

    pub fn parse(raw: &str) -> ApiResult<Self> {
        let (id, secret) = raw.split_once('.').ok_or_else(|| Error::invalid_grant("malformed refresh token"))?;
        Ok(Self { id: id.to_string(), secret: secret.to_string() })
    }
}

/// Issues a new refresh token for a just-approved auth code or device token,
/// registering it against the user's `OfflineSession` so every refresh
/// token sharing a `(user_id, connector_id)` can be enumerated/revoked
/// together (spec §4.5, §2 DATA MODEL).
pub async fn issue(
    storage: &Arc<dyn Storage>,
    client_id: &str,
    scopes: &[String],
    nonce: Option<String>,
    claims: Claims,
    connector_id: &str,
    connector_data: Option<Vec<u8>>,
) -> ApiResult<RefreshHandle> {
    let id = crypto::generate_opaque_token()?;
    let secret = crypto::generate_opaque_token()?;
    let now = now_secs();

    let token = RefreshToken {
        id: id.clone(),
        token: secret.clone(),
        obsolete_token: None,
        last_used: now,
        created_at: now,
        client_id: client_id.to_string(),
        scopes: scopes.to_vec(),
        nonce,
        claims: claims.clone(),
        connector_id: connector_id.to_string(),
        connector_data,
    };
    storage.create_refresh_token(token).await?;

    storage
        .update_offline_session(&claims.user_id, connector_id, {
            let id = id.clone();
            let client_id = client_id.to_string();
            Box::new(move |mut session| {
                session.refresh.insert(id.clone(), RefreshRef { id: id.clone(), client_id: client_id.clone(), created_at: now, last_used: now });
                Ok(session)
            })
        })
        .await?;

    Ok(RefreshHandle { id, secret })
}

pub struct RefreshResult {
    pub handle: RefreshHandle,
    pub scopes: Vec<String>,
    pub claims: Claims,
    pub connector_id: String,
    pub nonce: Option<String>,
}

/// Redeems `raw` (the `grant_type=refresh_token` `refresh_token` parameter),
/// rotating it and invoking the connector's `refresh` capability to pick up
/// any upstream-side claim changes (spec §4.5 step-by-step).
pub async fn redeem(storage: &Arc<dyn Storage>, connectors: &ConnectorRegistry, client_id: &str, raw: &str, requested_scopes: Option<&[String]>) -> ApiResult<RefreshResult> {
    let handle = RefreshHandle::parse(raw)?;
    let stored = storage.get_refresh_token(&handle.id).await.map_err(|_| Error::not_found("refresh token"))?;

    if stored.client_id != client_id {
        return Err(Error::invalid_grant("refresh token was not issued to this client"));
    }

    let now = now_secs();
    // spec §4.6: "Defaults disable each when zero" — a zero-valued lifetime
    // parameter means the corresponding check never rejects.
    let absolute_lifetime = CONFIG.refresh_absolute_lifetime_secs();
    if absolute_lifetime > 0 && now - stored.created_at > absolute_lifetime {
        storage.delete_refresh_token(&handle.id).await.ok();
        return Err(Error::invalid_grant("refresh token has expired"));
    }
    let valid_if_not_used_for = CONFIG.refresh_valid_if_not_used_for_secs();
    if valid_if_not_used_for > 0 && now - stored.last_used > valid_if_not_used_for {
        storage.delete_refresh_token(&handle.id).await.ok();
        return Err(Error::invalid_grant("refresh token has gone stale"));
    }

    let presented_current = crypto::ct_eq(handle.secret.as_bytes(), stored.token.as_bytes());
    let presented_obsolete = stored
        .obsolete_token
        .as_ref()
        .map(|old| crypto::ct_eq(handle.secret.as_bytes(), old.as_bytes()))
        .unwrap_or(false);

    // A reuse interval of zero disables the grace window entirely: any
    // presentation of the obsolete secret is an immediate replay.
    let reuse_interval = CONFIG.refresh_reuse_interval_secs();
    if presented_obsolete && (reuse_interval <= 0 || now - stored.last_used > reuse_interval) {
        // Past the grace window: this is a replay of an already-rotated
        // secret, not a client that missed the rotated response.
        storage.delete_refresh_token(&handle.id).await.ok();
        return Err(Error::invalid_grant("refresh token reuse detected"));
    }
    if !presented_current && !presented_obsolete {
        storage.delete_refresh_token(&handle.id).await.ok();
        return Err(Error::invalid_grant("refresh token is invalid"));
    }

    if presented_obsolete {
        // Spec §4.6 step 4: re-emit the *current* bundle unchanged rather than
        // rotating again, so a client that retried after losing the rotated
        // response converges on the same pair its sibling retry already got.
        return Ok(RefreshResult {
            handle: RefreshHandle { id: handle.id, secret: stored.token.clone() },
            scopes: stored.scopes.clone(),
            claims: stored.claims.clone(),
            connector_id: stored.connector_id.clone(),
            nonce: stored.nonce.clone(),
        });
    }

    if let Some(requested) = requested_scopes {
        if !requested.iter().all(|s| stored.scopes.contains(s)) {
            return Err(Error::invalid_scope("requested scope exceeds the scope originally granted"));
        }
    }
    let effective_scopes = requested_scopes.map(|s| s.to_vec()).unwrap_or_else(|| stored.scopes.clone());

    let identity = Identity {
        user_id: stored.claims.user_id.clone(),
        username: stored.claims.username.clone(),
        preferred_username: stored.claims.preferred_username.clone(),
        email: stored.claims.email.clone(),
        email_verified: stored.claims.email_verified,
        groups: stored.claims.groups.clone(),
        connector_data: stored.connector_data.clone().unwrap_or_default(),
    };

    let (instance, _) = connectors.get(&stored.connector_id).await?;
    let refreshed = match &instance.refresh {
        Some(connector) => connector.refresh(&effective_scopes, identity).await?,
        None => identity,
    };

    let new_claims = Claims {
        user_id: refreshed.user_id,
        username: refreshed.username,
        preferred_username: refreshed.preferred_username,
        email: refreshed.email,
        email_verified: refreshed.email_verified,
        groups: refreshed.groups,
    };
    let new_secret = crypto::generate_opaque_token()?;

    let updated = storage
        .update_refresh_token(&handle.id, {
            let new_secret = new_secret.clone();
            let new_claims = new_claims.clone();
            let connector_data = refreshed.connector_data.clone();
            Box::new(move |mut t| {
                t.obsolete_token = Some(t.token.clone());
                t.token = new_secret.clone();
                t.last_used = now_secs();
                t.claims = new_claims.clone();
                t.connector_data = if connector_data.is_empty() { None } else { Some(connector_data.clone()) };
                Ok(t)
            })
        })
        .await?;

    storage
        .update_offline_session(&updated.claims.user_id, &updated.connector_id, {
            let id = handle.id.clone();
            Box::new(move |mut session| {
                if let Some(r) = session.refresh.get_mut(&id) {
                    r.last_used = now_secs();
                }
                Ok(session)
            })
        })
        .await
        .ok();

    Ok(RefreshResult {
        handle: RefreshHandle { id: handle.id, secret: new_secret },
        scopes: effective_scopes,
        claims: updated.claims,
        connector_id: updated.connector_id,
        nonce: updated.nonce,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use serde_json::json;

    fn sample_claims() -> Claims {
        Claims { user_id: "u1".into(), username: "alice".into(), preferred_username: "alice".into(), email: "alice@example.com".into(), email_verified: true, groups: vec![] }
    }

    async fn setup() -> (Arc<dyn Storage>, ConnectorRegistry) {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        storage
            .create_connector(crate::storage::Connector { id: "mock".into(), connector_type: "mock".into(), name: "mock".into(), resource_version: 1, config: json!({}) })
            .await
            .unwrap();
        let registry = ConnectorRegistry::new(storage.clone());
        (storage, registry)
    }

    #[tokio::test]
    async fn redeem_rotates_the_secret() {
        let (storage, registry) = setup().await;
        let handle = issue(&storage, "client-a", &["openid".into()], None, sample_claims(), "mock", None).await.unwrap();
        let raw = handle.format();

        let result = redeem(&storage, &registry, "client-a", &raw, None).await.unwrap();
        assert_ne!(result.handle.secret, handle.secret);
        assert_eq!(result.handle.id, handle.id);
    }

    #[tokio::test]
    async fn obsolete_secret_is_accepted_inside_the_grace_window_and_does_not_rotate_again() {
        let (storage, registry) = setup().await;
        let handle = issue(&storage, "client-a", &["openid".into()], None, sample_claims(), "mock", None).await.unwrap();
        let r1 = handle.format();

        // First redeem: r1 -> r2.
        let r2 = redeem(&storage, &registry, "client-a", &r1, None).await.unwrap();
        assert_ne!(r2.handle.secret, handle.secret);

        // Re-presenting the now-obsolete r1 (lost response scenario) must
        // re-emit the *same* r2 bundle rather than minting a third secret.
        let replay = redeem(&storage, &registry, "client-a", &r1, None).await.unwrap();
        assert_eq!(replay.handle.secret, r2.handle.secret);

        // r2 itself still works and rotates forward normally.
        let r3 = redeem(&storage, &registry, "client-a", &r2.handle.format(), None).await.unwrap();
        assert_ne!(r3.handle.secret, r2.handle.secret);
    }

    #[tokio::test]
    async fn stale_secret_past_the_grace_window_is_a_replay() {
        let (storage, registry) = setup().await;
        let handle = issue(&storage, "client-a", &["openid".into()], None, sample_claims(), "mock", None).await.unwrap();
        let r1 = handle.format();
        redeem(&storage, &registry, "client-a", &r1, None).await.unwrap();

        // Force the grace window to have elapsed.
        storage
            .update_refresh_token(
                &handle.id,
                Box::new(|mut t| {
                    t.last_used -= CONFIG.refresh_reuse_interval_secs() + 1;
                    Ok(t)
                }),
            )
            .await
            .unwrap();

        assert!(redeem(&storage, &registry, "client-a", &r1, None).await.is_err());
        // The record is gone entirely, so even the rotated secret now fails.
        assert!(storage.get_refresh_token(&handle.id).await.is_err());
    }

    #[tokio::test]
    async fn wrong_client_is_rejected() {
        let (storage, registry) = setup().await;
        let handle = issue(&storage, "client-a", &["openid".into()], None, sample_claims(), "mock", None).await.unwrap();
        let raw = handle.format();
        assert!(redeem(&storage, &registry, "client-b", &raw, None).await.is_err());
    }

    #[tokio::test]
    async fn widening_scope_on_refresh_is_rejected() {
        let (storage, registry) = setup().await;
        let handle = issue(&storage, "client-a", &["openid".into()], None, sample_claims(), "mock", None).await.unwrap();
        let raw = handle.format();
        let wider = vec!["openid".to_string(), "groups".to_string()];
        assert!(redeem(&storage, &registry, "client-a", &raw, Some(&wider)).await.is_err());
    }
}

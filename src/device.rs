//
// Device authorization flow (H, RFC 8628)
//
// A `DeviceRequest` pairs a long `device_code` (given to the polling device)
// with a short, human-typeable `user_code` (typed into the verification
// page on a second screen). Completion is recorded in a separate
// `DeviceToken` row keyed by `device_code` so the polling loop never needs
// the user_code again once the browser leg starts (spec §4.4/§6, RFC 8628
// §3.2-3.5).
//
use std::sync::Arc;

use rand::Rng;

use crate::{
    config::CONFIG,
    crypto,
    error::{ApiResult, Error},
    storage::{Claims, DeviceRequest, DeviceToken, DeviceTokenStatus, Storage},
    util::now_secs,
};

const USER_CODE_ALPHABET: &[u8] = b"BCDFGHJKLMNPQRSTVWXZ"; // no vowels, no easily-confused letters
const USER_CODE_LEN: usize = 8;

fn generate_user_code() -> String {
    let mut rng = rand::thread_rng();
    let raw: String = (0..USER_CODE_LEN).map(|_| USER_CODE_ALPHABET[rng.gen_range(0..USER_CODE_ALPHABET.len())] as char).collect();
    format!("{}-{}", &raw[..4], &raw[4..])
}

pub struct DeviceStart {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub expires_in: i64,
    pub interval: i64,
}

/// RFC 8628 §3.1/§3.2: issues the `device_code`/`user_code` pair and records
/// the pending `DeviceToken` the polling leg will observe flip to `Complete`.
pub async fn start(storage: &Arc<dyn Storage>, client_id: &str, scopes: Vec<String>) -> ApiResult<DeviceStart> {
    let device_code = crypto::generate_opaque_token()?;
    let user_code = generate_user_code();
    let now = now_secs();
    let expiry = now + CONFIG.device_code_lifetime_secs();
    let interval = CONFIG.device_poll_interval_secs();

    storage
        .create_device_request(DeviceRequest { user_code: user_code.clone(), device_code: device_code.clone(), client_id: client_id.to_string(), scopes, expiry, poll_interval: interval })
        .await?;
    storage
        .create_device_token(DeviceToken { device_code: device_code.clone(), status: DeviceTokenStatus::Pending, token_response: None, last_request: now, poll_interval: interval, expiry })
        .await?;

    let verification_uri = format!("{}/device", CONFIG.issuer());
    let verification_uri_complete = format!("{verification_uri}?user_code={user_code}");
    Ok(DeviceStart { device_code, user_code, verification_uri, verification_uri_complete, expires_in: CONFIG.device_code_lifetime_secs(), interval })
}

/// Resolves a typed `user_code` to its pending request for the verification
/// page (spec §6, RFC 8628 §3.3).
pub async fn lookup_by_user_code(storage: &Arc<dyn Storage>, user_code: &str) -> ApiResult<DeviceRequest> {
    let normalized = user_code.trim().to_uppercase();
    let req = storage.get_device_request_by_user_code(&normalized).await.map_err(|_| Error::invalid_request("unknown or expired user code"))?;
    if now_secs() > req.expiry {
        return Err(Error::invalid_request("user code has expired"));
    }
    Ok(req)
}

/// Records the outcome of the browser-side approval/denial for `device_code`
/// (RFC 8628 §3.3). `token_response` is the already-assembled JSON body the
/// polling leg will be handed verbatim once it asks.
pub async fn complete(storage: &Arc<dyn Storage>, device_code: &str, token_response: serde_json::Value) -> ApiResult<()> {
    storage
        .update_device_token(
            device_code,
            Box::new(move |mut t| {
                t.status = DeviceTokenStatus::Complete;
                t.token_response = Some(token_response.clone());
                Ok(t)
            }),
        )
        .await?;
    storage.delete_device_request(device_code).await.ok();
    Ok(())
}

pub enum PollOutcome {
    Pending,
    SlowDown,
    Complete(serde_json::Value),
}

/// `grant_type=urn:ietf:params:oauth:grant-type:device_code` polling leg
/// (RFC 8628 §3.4/§3.5): enforces the minimum interval between polls,
/// reports `authorization_pending`/`slow_down` until the browser leg
/// completes, then hands back the token response exactly once.
pub async fn poll(storage: &Arc<dyn Storage>, device_code: &str) -> ApiResult<PollOutcome> {
    let token = storage.get_device_token(device_code).await.map_err(|_| Error::oidc(crate::error::ErrorKind::ExpiredToken, "unknown device_code"))?;
    let now = now_secs();
    if now > token.expiry {
        storage.delete_device_token(device_code).await.ok();
        return Err(Error::oidc(crate::error::ErrorKind::ExpiredToken, "device code has expired"));
    }

    if now - token.last_request < token.poll_interval {
        storage
            .update_device_token(
                device_code,
                Box::new(move |mut t| {
                    t.last_request = now_secs();
                    Ok(t)
                }),
            )
            .await?;
        return Ok(PollOutcome::SlowDown);
    }

    storage
        .update_device_token(
            device_code,
            Box::new(move |mut t| {
                t.last_request = now_secs();
                Ok(t)
            }),
        )
        .await?;

    match token.status {
        DeviceTokenStatus::Pending => Ok(PollOutcome::Pending),
        DeviceTokenStatus::Complete => {
            let response = token.token_response.ok_or_else(|| Error::server_error("device token marked complete with no response"))?;
            storage.delete_device_token(device_code).await.ok();
            Ok(PollOutcome::Complete(response))
        }
    }
}

/// Builds the `Claims` a device-flow approval records, mirroring what
/// `auth_request::mark_logged_in` does for the browser flow (spec §4.4).
pub fn claims_from_identity(identity: &crate::connector::Identity) -> Claims {
    Claims {
        user_id: identity.user_id.clone(),
        username: identity.username.clone(),
        preferred_username: identity.preferred_username.clone(),
        email: identity.email.clone(),
        email_verified: identity.email_verified,
        groups: identity.groups.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use serde_json::json;

    #[tokio::test]
    async fn poll_before_approval_is_pending() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let start = start(&storage, "client-a", vec!["openid".into()]).await.unwrap();
        assert!(matches!(poll(&storage, &start.device_code).await.unwrap(), PollOutcome::Pending));
    }

    #[tokio::test]
    async fn poll_after_approval_returns_token_once() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let start = start(&storage, "client-a", vec!["openid".into()]).await.unwrap();
        complete(&storage, &start.device_code, json!({"access_token": "at"})).await.unwrap();

        match poll(&storage, &start.device_code).await.unwrap() {
            PollOutcome::Complete(body) => assert_eq!(body["access_token"], "at"),
            _ => panic!("expected completion"),
        }
        assert!(storage.get_device_token(&start.device_code).await.is_err());
    }

    #[tokio::test]
    async fn polling_too_fast_triggers_slow_down() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let start = start(&storage, "client-a", vec!["openid".into()]).await.unwrap();
        poll(&storage, &start.device_code).await.unwrap();
        assert!(matches!(poll(&storage, &start.device_code).await.unwrap(), PollOutcome::SlowDown));
    }

    #[tokio::test]
    async fn user_code_lookup_rejects_expired_request() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let start = start(&storage, "client-a", vec!["openid".into()]).await.unwrap();
        storage
            .create_device_request(DeviceRequest { user_code: start.user_code.clone(), device_code: start.device_code.clone(), client_id: "client-a".into(), scopes: vec![], expiry: 0, poll_interval: 5 })
            .await
            .unwrap();
        assert!(lookup_by_user_code(&storage, &start.user_code).await.is_err());
    }
}

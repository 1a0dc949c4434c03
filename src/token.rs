//
// Token signer / verifier (D)
//
// Builds and signs ID tokens and access tokens as JWTs under the key
// manager's current signing key, and verifies tokens against the full
// published verification set (spec §4.3). Access tokens are signed JWTs
// here (not bare opaque strings): component I's introspection/userinfo both
// require verifying an access token's signature, which only typechecks if
// the access token *is* a JWT — see DESIGN.md for this Open-Question call.
//
use data_encoding::BASE64URL_NOPAD;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, Header, Validation};
use ring::digest;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::CONFIG,
    error::{ApiResult, Error},
    keys::KeyManager,
    storage::Claims as StoredClaims,
    util::now_secs,
};

/// `aud` may be a single string or an array on the wire (RFC 7519 §4.1.3);
/// we always encode as an array of one-or-more values and accept either
/// shape when decoding foreign tokens (subject tokens in token-exchange).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Many(Vec<String>),
    One(String),
}

impl Audience {
    pub fn contains(&self, client_id: &str) -> bool {
        match self {
            Self::Many(v) => v.iter().any(|a| a == client_id),
            Self::One(s) => s == client_id,
        }
    }

    pub fn as_vec(&self) -> Vec<String> {
        match self {
            Self::Many(v) => v.clone(),
            Self::One(s) => vec![s.clone()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Audience,
    pub exp: i64,
    pub iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub federated_claims: Option<Value>,
}

/// Access tokens are signed JWTs here (see module doc comment), so they
/// carry the same scope-gated profile claims as the ID token: userinfo
/// (spec §4.7) verifies the access token's signature and returns these
/// fields "verbatim as JSON" rather than re-deriving them from storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Audience,
    pub exp: i64,
    pub iat: i64,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
}

/// `sub` is `base64url(user_id|connector_id)` so the same federated user
/// under different connectors maps to distinct subjects (spec §4.3). The
/// teacher's protobuf framing isn't available here; a delimited string
/// carries the same two fields and round-trips identically.
pub fn subject_for(user_id: &str, connector_id: &str) -> String {
    let raw = format!("{user_id}|{connector_id}");
    BASE64URL_NOPAD.encode(raw.as_bytes())
}

pub fn parse_subject(sub: &str) -> Option<(String, String)> {
    let raw = BASE64URL_NOPAD.decode(sub.as_bytes()).ok()?;
    let raw = String::from_utf8(raw).ok()?;
    let (user_id, connector_id) = raw.split_once('|')?;
    Some((user_id.to_string(), connector_id.to_string()))
}

/// `at_hash`: base64url(left half of SHA-256(access_token)) per the RFC
/// mapping for RS256 (spec §4.3).
pub fn at_hash(access_token: &str) -> String {
    let digest = digest::digest(&digest::SHA256, access_token.as_bytes());
    let bytes = digest.as_ref();
    let half = &bytes[..bytes.len() / 2];
    BASE64URL_NOPAD.encode(half)
}

pub struct TokenSigner<'a> {
    keys: &'a KeyManager,
}

impl<'a> TokenSigner<'a> {
    pub fn new(keys: &'a KeyManager) -> Self {
        Self { keys }
    }

    /// `aud` is the requesting client unless cross-client scopes widened it
    /// (spec §4.5); callers compute the final audience set before calling in.
    #[allow(clippy::too_many_arguments)]
    pub async fn sign_id_token(
        &self,
        sub: &str,
        aud: Vec<String>,
        azp: Option<String>,
        nonce: Option<String>,
        claims: &StoredClaims,
        access_token: Option<&str>,
        federated_claims: Option<Value>,
    ) -> ApiResult<String> {
        let (kid, encoding_key) = self.keys.signing_key().await?;
        let now = now_secs();
        let body = IdTokenClaims {
            iss: CONFIG.issuer(),
            sub: sub.to_string(),
            aud: Audience::Many(aud),
            exp: now + CONFIG.id_token_lifetime_secs(),
            iat: now,
            nonce,
            azp,
            at_hash: access_token.map(at_hash),
            email: (!claims.email.is_empty()).then(|| claims.email.clone()),
            email_verified: (!claims.email.is_empty()).then_some(claims.email_verified),
            groups: (!claims.groups.is_empty()).then(|| claims.groups.clone()),
            name: (!claims.username.is_empty()).then(|| claims.username.clone()),
            preferred_username: (!claims.preferred_username.is_empty()).then(|| claims.preferred_username.clone()),
            federated_claims,
        };
        let header = Header { kid: Some(kid), ..Header::new(Algorithm::RS256) };
        encode(&header, &body, &encoding_key).map_err(Error::from)
    }

    pub async fn sign_access_token(&self, sub: &str, aud: Vec<String>, scopes: &[String], client_id: &str, claims: &StoredClaims) -> ApiResult<String> {
        let (kid, encoding_key) = self.keys.signing_key().await?;
        let now = now_secs();
        let has_scope = |s: &str| scopes.iter().any(|x| x == s);
        let body = AccessTokenClaims {
            iss: CONFIG.issuer(),
            sub: sub.to_string(),
            aud: Audience::Many(aud),
            exp: now + CONFIG.access_token_lifetime_secs(),
            iat: now,
            scope: scopes.join(" "),
            client_id: Some(client_id.to_string()),
            email: (has_scope("email") && !claims.email.is_empty()).then(|| claims.email.clone()),
            email_verified: (has_scope("email") && !claims.email.is_empty()).then_some(claims.email_verified),
            groups: (has_scope("groups") && !claims.groups.is_empty()).then(|| claims.groups.clone()),
            name: (has_scope("profile") && !claims.username.is_empty()).then(|| claims.username.clone()),
            preferred_username: (has_scope("profile") && !claims.preferred_username.is_empty()).then(|| claims.preferred_username.clone()),
        };
        let header = Header { kid: Some(kid), ..Header::new(Algorithm::RS256) };
        encode(&header, &body, &encoding_key).map_err(Error::from)
    }
}

/// Verifies `token` against every currently-published key (spec §4.3:
/// "accepts if any verifies"). `expected_aud` is optional since userinfo
/// doesn't know its own audience ahead of time; the token endpoint's
/// introspection path passes `None` for the same reason.
pub async fn verify_access_token(keys: &KeyManager, token: &str, expected_aud: Option<&str>) -> ApiResult<AccessTokenClaims> {
    let header = decode_header(token).map_err(Error::from)?;
    let candidates = keys.decoding_keys().await?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_issuer(&[CONFIG.issuer()]);
    validation.validate_aud = false;

    for (kid, decoding_key) in &candidates {
        if let Some(header_kid) = &header.kid {
            if header_kid != kid {
                continue;
            }
        }
        if let Ok(data) = decode::<AccessTokenClaims>(token, decoding_key, &validation) {
            if let Some(aud) = expected_aud {
                if !data.claims.aud.contains(aud) {
                    continue;
                }
            }
            return Ok(data.claims);
        }
    }
    Err(Error::invalid_grant("token verification failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use std::sync::Arc;

    fn sample_claims() -> StoredClaims {
        StoredClaims {
            user_id: "u1".into(),
            username: "user one".into(),
            preferred_username: "user1".into(),
            email: "u1@example.com".into(),
            email_verified: true,
            groups: vec!["eng".into()],
        }
    }

    #[tokio::test]
    async fn id_token_lifetime_matches_config() {
        let keys = KeyManager::new(Arc::new(MemoryStorage::new()));
        let signer = TokenSigner::new(&keys);
        let claims = sample_claims();
        let sub = subject_for("u1", "mock");
        let jwt = signer.sign_id_token(&sub, vec!["client-a".into()], None, Some("nonce1".into()), &claims, Some("at-value"), None).await.unwrap();

        let header = decode_header(&jwt).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);

        let decoding_keys = keys.decoding_keys().await.unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        let data = decode::<IdTokenClaims>(&jwt, &decoding_keys[0].1, &validation).unwrap();
        assert!((data.claims.exp - data.claims.iat - CONFIG.id_token_lifetime_secs()).abs() <= 1);
        assert_eq!(data.claims.at_hash.unwrap(), at_hash("at-value"));
    }

    #[test]
    fn subject_round_trips() {
        let sub = subject_for("user-1", "conn-a");
        assert_eq!(parse_subject(&sub), Some(("user-1".to_string(), "conn-a".to_string())));
    }
}

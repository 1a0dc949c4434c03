//
// Key manager (C)
//
// Owns the periodic signing-key rotation and serves the current signer plus
// every still-valid historical verifier (spec §4.2). Reads are cached
// in-memory for `rotation_frequency/2`; every mutation goes straight to
// storage and refreshes the cache inline, so a rotation is visible to the
// next reader immediately rather than waiting out the TTL.
//
// RSA keypairs are generated with `openssl` (already in the dependency graph
// for Argon2id's competitor ciphers are not needed here, but the crate's RSA
// generation is the one in this workspace we trust not to reinvent). The
// public half is published as a JWK built directly from the modulus/exponent,
// which also lets the verifier use `DecodingKey::from_rsa_components`
// without ever re-parsing PEM.
//
use std::sync::Arc;

use data_encoding::BASE64URL_NOPAD;
use jsonwebtoken::{DecodingKey, EncodingKey};
use openssl::rsa::Rsa;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::{
    config::CONFIG,
    error::{ApiResult, Error},
    storage::{Keys, Storage, VerificationKey},
    util::now_secs,
};

/// One freshly-minted RSA keypair, already split into the forms each caller needs.
struct FreshKey {
    kid: String,
    der: Vec<u8>,
    jwk: Value,
}

fn generate_key(bits: u32) -> ApiResult<FreshKey> {
    let rsa = Rsa::generate(bits).map_err(|e| Error::server_error(format!("RSA key generation failed: {e}")))?;
    let der = rsa.private_key_to_der().map_err(|e| Error::server_error(format!("RSA DER encoding failed: {e}")))?;
    let n = BASE64URL_NOPAD.encode(&rsa.n().to_vec());
    let e = BASE64URL_NOPAD.encode(&rsa.e().to_vec());
    let kid = crate::crypto::generate_opaque_token()?;
    let jwk = json!({
        "kty": "RSA",
        "use": "sig",
        "alg": "RS256",
        "kid": kid,
        "n": n,
        "e": e,
    });
    Ok(FreshKey { kid, der, jwk })
}

struct CachedKeys {
    keys: Keys,
    cached_at: i64,
}

/// Serves the current signer and the published verification set, caching
/// reads and rotating on a timer (spec §4.2, §5 "shared resource policy").
pub struct KeyManager {
    storage: Arc<dyn Storage>,
    cache: RwLock<Option<CachedKeys>>,
}

impl KeyManager {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage, cache: RwLock::new(None) }
    }

    fn cache_ttl(&self) -> i64 {
        (CONFIG.rotation_frequency_secs() / 2).max(1)
    }

    /// Returns the current keys, bootstrapping a fresh set if none exist yet.
    pub async fn current(&self) -> ApiResult<Keys> {
        let now = now_secs();
        if let Some(cached) = self.cache.read().await.as_ref() {
            if now - cached.cached_at < self.cache_ttl() {
                return Ok(cached.keys.clone());
            }
        }

        let keys = match self.storage.get_keys().await? {
            Some(k) => k,
            None => self.bootstrap().await?,
        };
        *self.cache.write().await = Some(CachedKeys { keys: keys.clone(), cached_at: now });
        Ok(keys)
    }

    async fn bootstrap(&self) -> ApiResult<Keys> {
        self.storage
            .update_keys(Box::new(move |existing| match existing {
                Some(k) => Ok(k),
                None => {
                    let fresh = generate_key(CONFIG.rsa_key_size_bits())?;
                    Ok(Keys {
                        kid: fresh.kid,
                        signing_key_der: fresh.der,
                        signing_key_pub: fresh.jwk,
                        verification_keys: Vec::new(),
                        next_rotation: now_secs() + CONFIG.rotation_frequency_secs(),
                    })
                }
            }))
            .await
    }

    /// Rotates if `next_rotation` has passed; otherwise a no-op. Called by
    /// the background scheduler (ambient component P), which sleeps until
    /// `next_rotation` between calls rather than polling.
    pub async fn rotate_if_due(&self) -> ApiResult<Keys> {
        let now = now_secs();
        let current = self.storage.get_keys().await?;
        if let Some(k) = &current {
            if now < k.next_rotation {
                return Ok(k.clone());
            }
        }

        let rotated = self
            .storage
            .update_keys(Box::new(move |existing| {
                let now = now_secs();
                if let Some(k) = &existing {
                    if now < k.next_rotation {
                        return Ok(k.clone());
                    }
                }
                let fresh = generate_key(CONFIG.rsa_key_size_bits())?;
                let mut verification_keys: Vec<VerificationKey> = existing
                    .as_ref()
                    .map(|k| k.verification_keys.clone())
                    .unwrap_or_default();
                verification_keys.retain(|vk| vk.expiry > now);
                if let Some(old) = existing {
                    verification_keys.push(VerificationKey {
                        kid: old.kid.clone(),
                        public_jwk: old.signing_key_pub.clone(),
                        expiry: now + CONFIG.verification_ttl_secs(),
                    });
                }
                Ok(Keys {
                    kid: fresh.kid,
                    signing_key_der: fresh.der,
                    signing_key_pub: fresh.jwk,
                    verification_keys,
                    next_rotation: now + CONFIG.rotation_frequency_secs(),
                })
            }))
            .await?;

        *self.cache.write().await = Some(CachedKeys { keys: rotated.clone(), cached_at: now });
        Ok(rotated)
    }

    pub async fn signing_key(&self) -> ApiResult<(String, EncodingKey)> {
        let keys = self.current().await?;
        let key = EncodingKey::from_rsa_der(&keys.signing_key_der);
        Ok((keys.kid, key))
    }

    /// All currently-publishable decoding keys: the live signer's public key
    /// plus every still-valid historical verifier (spec §4.3 "verifier walks
    /// `{signing_key_pub} ∪ verification_keys`").
    pub async fn decoding_keys(&self) -> ApiResult<Vec<(String, DecodingKey)>> {
        let keys = self.current().await?;
        let mut out = Vec::with_capacity(1 + keys.verification_keys.len());
        out.push((keys.kid.clone(), jwk_to_decoding_key(&keys.signing_key_pub)?));
        for vk in &keys.verification_keys {
            out.push((vk.kid.clone(), jwk_to_decoding_key(&vk.public_jwk)?));
        }
        Ok(out)
    }

    /// JWKS document: the published `{signing_key_pub} ∪ verification_keys}` set.
    pub async fn jwks(&self) -> ApiResult<Value> {
        let keys = self.current().await?;
        let mut entries = vec![keys.signing_key_pub.clone()];
        entries.extend(keys.verification_keys.iter().map(|vk| vk.public_jwk.clone()));
        Ok(json!({ "keys": entries }))
    }

    /// `Cache-Control: max-age` for `/keys` and discovery: time to the next
    /// rotation, floored at 120s (spec §4.2).
    pub async fn cache_max_age(&self) -> ApiResult<u64> {
        let keys = self.current().await?;
        let remaining = keys.next_rotation - now_secs();
        Ok(remaining.max(120) as u64)
    }

    pub async fn signing_algorithm(&self) -> ApiResult<&'static str> {
        Ok("RS256")
    }
}

fn jwk_to_decoding_key(jwk: &Value) -> ApiResult<DecodingKey> {
    let n = jwk.get("n").and_then(Value::as_str).ok_or_else(|| Error::server_error("malformed JWK: missing n"))?;
    let e = jwk.get("e").and_then(Value::as_str).ok_or_else(|| Error::server_error("malformed JWK: missing e"))?;
    DecodingKey::from_rsa_components(n, e).map_err(Error::from)
}

//
// Crypto primitives shared across the state machine: opaque token generation,
// HMAC continuity tags, constant-time comparison, random key material.
// Grounded on the teacher's `crypto.rs`, trimmed of the PBKDF2 password
// hashing (superseded here by `argon2`/`bcrypt`, see `secrets.rs`) and kept
// for HMAC/random/constant-time since those primitives carry over unchanged.
//
use data_encoding::{BASE64URL_NOPAD, HEXLOWER};
use ring::{digest, hmac, rand::SecureRandom};

use crate::error::Error;

/// 256 bits of randomness, base64url-encoded without padding: used for
/// authorization codes, refresh tokens, device codes and user codes before
/// any prefixing/formatting the caller applies.
pub fn generate_opaque_token() -> Result<String, Error> {
    let bytes = get_random(32)?;
    Ok(BASE64URL_NOPAD.encode(&bytes))
}

pub fn get_random(len: usize) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; len];
    ring::rand::SystemRandom::new().fill(&mut buf).map_err(|_| Error::server_error("failed to generate random bytes"))?;
    Ok(buf)
}

/// Signs `data` with `key` using HMAC-SHA256, hex-encoded. Used for the
/// `AuthRequest` continuity tag (spec §4.4: a client-bound value the
/// `/callback` leg must present unchanged) and for short-lived signed state
/// blobs handed to a connector's upstream redirect.
pub fn hmac_sign(key: &[u8], data: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let signature = hmac::sign(&key, data.as_bytes());
    HEXLOWER.encode(signature.as_ref())
}

pub fn hmac_verify(key: &[u8], data: &str, tag_hex: &str) -> bool {
    let Ok(expected) = HEXLOWER.decode(tag_hex.as_bytes()) else {
        return false;
    };
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::verify(&key, data.as_bytes(), &expected).is_ok()
}

/// PKCE `code_challenge` derivation (RFC 7636 §4.2): `plain` is the verifier
/// itself, `S256` is `base64url(sha256(verifier))`. Any other method name is
/// rejected earlier, in `auth_request::validate_pkce`.
pub fn pkce_challenge(verifier: &str, method: &str) -> String {
    if method == "S256" {
        let digest = digest::digest(&digest::SHA256, verifier.as_bytes());
        BASE64URL_NOPAD.encode(digest.as_ref())
    } else {
        verifier.to_string()
    }
}

/// Constant-time byte comparison, used wherever a caller-supplied opaque
/// secret (auth code, refresh token, device code, client secret hash input)
/// is compared against a stored value.
pub fn ct_eq<T: AsRef<[u8]>, U: AsRef<[u8]>>(a: T, b: U) -> bool {
    ring::constant_time::verify_slices_are_equal(a.as_ref(), b.as_ref()).is_ok()
}

//
// Client secret / password hashing
//
// `Client.secret` is hashed with Argon2id (spec §3 addition): the hash is
// the PHC string format, and verification re-hashes the presented secret
// with argon2's constant-time verifier rather than via `crypto::ct_eq`
// directly on raw bytes, since Argon2 hashes are themselves salted/randomized.
// `Password.bcrypt_hash` uses `bcrypt` directly with a cost floor of 10,
// matching spec §3's explicit mention of bcrypt for local password records.
//
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::{config::CONFIG, error::Error};

pub fn hash_client_secret(secret: &str) -> Result<String, Error> {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    let params = argon2::Params::new(CONFIG.argon2_memory_kib(), 2, 1, None).map_err(|e| Error::server_error(format!("invalid argon2 params: {e}")))?;
    let hasher = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
    let hash = hasher.hash_password(secret.as_bytes(), &salt).map_err(Error::from)?;
    Ok(hash.to_string())
}

pub fn verify_client_secret(secret: &str, phc_hash: &str) -> Result<bool, Error> {
    let parsed = PasswordHash::new(phc_hash).map_err(Error::from)?;
    Ok(Argon2::default().verify_password(secret.as_bytes(), &parsed).is_ok())
}

const MIN_BCRYPT_COST: u32 = 10;

pub fn hash_password(plaintext: &str) -> Result<String, Error> {
    let cost = CONFIG.bcrypt_cost().max(MIN_BCRYPT_COST);
    bcrypt::hash(plaintext, cost).map_err(Error::from)
}

pub fn verify_password(plaintext: &str, bcrypt_hash: &str) -> Result<bool, Error> {
    bcrypt::verify(plaintext, bcrypt_hash).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_secret_round_trips() {
        let hash = hash_client_secret("s3cret-value").unwrap();
        assert!(verify_client_secret("s3cret-value", &hash).unwrap());
        assert!(!verify_client_secret("wrong-value", &hash).unwrap());
    }

    #[test]
    fn password_round_trips() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash).unwrap());
        assert!(!verify_password("incorrect", &hash).unwrap());
    }
}

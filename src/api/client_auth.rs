//
// Client authentication shared by the token, introspection and dynamic
// registration endpoints: `client_secret_basic` (HTTP Basic) or
// `client_secret_post` (form fields), per spec §4.5 and the discovery
// document's `token_endpoint_auth_methods_supported`.
//
use std::sync::Arc;

use data_encoding::BASE64;
use rocket::http::HeaderMap;

use crate::{
    error::{Error, ErrorKind},
    secrets,
    storage::{Client, Storage},
};

fn parse_basic_header(headers: &HeaderMap<'_>) -> Option<(String, String)> {
    let raw = headers.get_one("Authorization")?;
    let encoded = raw.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim().as_bytes()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

/// Resolves the requesting client's id/secret from either credential form
/// and loads the matching `Client`. A wrong or missing secret on a
/// confidential client is always `invalid_client` with `WWW-Authenticate:
/// Basic` (spec §7 AuthnError) — never distinguished from "unknown client".
pub async fn authenticate(
    storage: &Arc<dyn Storage>,
    headers: &HeaderMap<'_>,
    form_client_id: Option<&str>,
    form_client_secret: Option<&str>,
) -> Result<Client, Error> {
    let (client_id, client_secret) = match parse_basic_header(headers) {
        Some((id, secret)) => (id, Some(secret)),
        None => {
            let id = form_client_id.ok_or_else(|| Error::oidc(ErrorKind::InvalidClient, "client authentication required").with_www_authenticate())?;
            (id.to_string(), form_client_secret.map(str::to_string))
        }
    };

    let client = storage
        .get_client(&client_id)
        .await
        .map_err(|_| Error::oidc(ErrorKind::InvalidClient, "unknown client").with_www_authenticate())?;

    match (&client.secret_hash, client_secret) {
        (Some(hash), Some(secret)) => {
            if !secrets::verify_client_secret(&secret, hash)? {
                return Err(Error::oidc(ErrorKind::InvalidClient, "invalid client secret").with_www_authenticate());
            }
        }
        (Some(_), None) => {
            return Err(Error::oidc(ErrorKind::InvalidClient, "client secret required").with_www_authenticate());
        }
        (None, _) => {
            // Public client: no secret on file, so none is required. If one
            // was presented anyway it's simply ignored rather than checked.
        }
    }

    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use rocket::http::Header;

    fn sample_client(secret_hash: Option<String>) -> Client {
        let public = secret_hash.is_none();
        Client {
            id: "client-a".into(),
            secret_hash,
            public,
            redirect_uris: vec!["https://example.com/cb".into()],
            trusted_peers: vec![],
            name: "client-a".into(),
            logo_url: None,
            allow_password_grant: false,
            skip_approval_screen: false,
        }
    }

    #[tokio::test]
    async fn accepts_form_credentials() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let hash = secrets::hash_client_secret("s3cret").unwrap();
        storage.create_client(sample_client(Some(hash))).await.unwrap();
        let headers = HeaderMap::new();
        let client = authenticate(&storage, &headers, Some("client-a"), Some("s3cret")).await.unwrap();
        assert_eq!(client.id, "client-a");
    }

    #[tokio::test]
    async fn rejects_wrong_secret() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let hash = secrets::hash_client_secret("s3cret").unwrap();
        storage.create_client(sample_client(Some(hash))).await.unwrap();
        let headers = HeaderMap::new();
        assert!(authenticate(&storage, &headers, Some("client-a"), Some("wrong")).await.is_err());
    }

    #[tokio::test]
    async fn accepts_basic_header() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let hash = secrets::hash_client_secret("s3cret").unwrap();
        storage.create_client(sample_client(Some(hash))).await.unwrap();
        let mut headers = HeaderMap::new();
        let encoded = BASE64.encode(b"client-a:s3cret");
        headers.add(Header::new("Authorization", format!("Basic {encoded}")));
        let client = authenticate(&storage, &headers, None, None).await.unwrap();
        assert_eq!(client.id, "client-a");
    }

    #[tokio::test]
    async fn public_client_needs_no_secret() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        storage.create_client(sample_client(None)).await.unwrap();
        let headers = HeaderMap::new();
        let client = authenticate(&storage, &headers, Some("client-a"), None).await.unwrap();
        assert_eq!(client.id, "client-a");
    }
}

//
// Token endpoint (F): grant-type dispatch for authorization_code,
// refresh_token, the device-code poll, token-exchange (RFC 8693) and the
// password grant.
//
use std::sync::Arc;

use rocket::{form::Form, http::HeaderMap, post, serde::json::Json, FromForm, Request, Route, State};
use serde_json::{json, Value};

use crate::{
    api::{bundle, client_auth},
    auth_request,
    config::CONFIG,
    connector::ConnectorRegistry,
    crypto, device,
    error::{ApiResult, Error, ErrorKind},
    keys::KeyManager,
    ratelimit, refresh,
    storage::Storage,
    util::ClientIp,
};

pub fn routes() -> Vec<Route> {
    rocket::routes![token]
}

#[derive(Debug, FromForm)]
struct TokenForm {
    grant_type: String,
    #[field(default = None)]
    code: Option<String>,
    #[field(default = None)]
    redirect_uri: Option<String>,
    #[field(default = None)]
    code_verifier: Option<String>,
    #[field(default = None)]
    refresh_token: Option<String>,
    #[field(default = None)]
    scope: Option<String>,
    #[field(default = None)]
    device_code: Option<String>,
    #[field(default = None)]
    subject_token: Option<String>,
    #[field(default = None)]
    subject_token_type: Option<String>,
    #[field(default = None)]
    requested_token_type: Option<String>,
    #[field(default = None)]
    audience: Option<String>,
    #[field(default = None)]
    connector_id: Option<String>,
    #[field(default = None)]
    username: Option<String>,
    #[field(default = None)]
    password: Option<String>,
    #[field(default = None)]
    client_id: Option<String>,
    #[field(default = None)]
    client_secret: Option<String>,
}

impl TokenForm {
    fn scopes(&self) -> Option<Vec<String>> {
        self.scope.as_ref().map(|s| s.split_whitespace().map(str::to_string).collect())
    }
}

#[post("/token", data = "<form>")]
async fn token(
    form: Form<TokenForm>,
    req: &Request<'_>,
    ip: ClientIp,
    storage: &State<Arc<dyn Storage>>,
    connectors: &State<Arc<ConnectorRegistry>>,
    keys: &State<Arc<KeyManager>>,
) -> ApiResult<Json<Value>> {
    ratelimit::check_token_endpoint(&ip.0)?;

    let form = form.into_inner();
    if !CONFIG.grant_types().iter().any(|g| g == &form.grant_type) {
        return Err(Error::oidc(ErrorKind::UnsupportedGrantType, format!("unsupported grant_type `{}`", form.grant_type)));
    }

    let body = match form.grant_type.as_str() {
        "authorization_code" => authorization_code_grant(&form, req.headers(), storage, connectors, keys).await?,
        "refresh_token" => refresh_token_grant(&form, req.headers(), storage, connectors, keys).await?,
        "urn:ietf:params:oauth:grant-type:device_code" => device_code_grant(&form, storage).await?,
        "urn:ietf:params:oauth:grant-type:token-exchange" => token_exchange_grant(&form, storage, connectors, keys).await?,
        "password" => password_grant(&form, req.headers(), storage, connectors, keys).await?,
        other => return Err(Error::oidc(ErrorKind::UnsupportedGrantType, format!("unsupported grant_type `{other}`"))),
    };
    Ok(Json(body))
}

/// spec §4.5: load-then-delete the code, verify it was issued to the
/// authenticated client with this `redirect_uri`, then check PKCE before
/// minting a bundle.
async fn authorization_code_grant(
    form: &TokenForm,
    headers: &HeaderMap<'_>,
    storage: &Arc<dyn Storage>,
    _connectors: &ConnectorRegistry,
    keys: &KeyManager,
) -> ApiResult<Value> {
    let client = client_auth::authenticate(storage, headers, form.client_id.as_deref(), form.client_secret.as_deref()).await?;
    let code_id = form.code.as_ref().ok_or_else(|| Error::invalid_request("code is required"))?;
    let code = storage.take_auth_code(code_id).await.map_err(|_| Error::invalid_grant("unknown or already-redeemed code"))?;

    if code.client_id != client.id {
        return Err(Error::invalid_grant("code was not issued to this client"));
    }
    if form.redirect_uri.as_deref() != Some(code.redirect_uri.as_str()) {
        return Err(Error::invalid_grant("redirect_uri does not match the one used to obtain the code"));
    }

    if let Some(challenge) = &code.code_challenge {
        let verifier = form.code_verifier.as_ref().ok_or_else(|| Error::invalid_grant("code_verifier is required"))?;
        let method = code.code_challenge_method.as_deref().unwrap_or("plain");
        let expected = crypto::pkce_challenge(verifier, method);
        if !crypto::ct_eq(expected.as_bytes(), challenge.as_bytes()) {
            return Err(Error::invalid_grant("code_verifier does not match code_challenge"));
        }
    } else if form.code_verifier.is_some() {
        return Err(Error::invalid_grant("code_verifier supplied for a request with no code_challenge"));
    }

    // spec §4.4/§4.5, Glossary "cross-client audience": a `audience:server:
    // client_id:<peer>` scope widens `aud` to include the peer and pins
    // `azp` to the requesting client, provided the peer still trusts it at
    // exchange time (re-validated here, not just at `/auth`).
    let (_, audience) = auth_request::expand_audience(storage, &client.id, &code.scopes).await?;
    let azp = (audience.len() > 1).then(|| client.id.clone());
    bundle::mint(keys, storage, &client.id, audience, azp, &code.scopes, code.nonce, &code.claims, &code.connector_id, code.connector_data).await
}

/// spec §4.6: redeem (rotate) the refresh token via `refresh::redeem`, then
/// sign a fresh bundle and attach the already-rotated handle — `bundle::mint`
/// is deliberately not used here since it would mint a second, unrelated
/// refresh token on top of the one `redeem` just rotated.
async fn refresh_token_grant(
    form: &TokenForm,
    headers: &HeaderMap<'_>,
    storage: &Arc<dyn Storage>,
    connectors: &ConnectorRegistry,
    keys: &KeyManager,
) -> ApiResult<Value> {
    let client = client_auth::authenticate(storage, headers, form.client_id.as_deref(), form.client_secret.as_deref()).await?;
    let raw = form.refresh_token.as_ref().ok_or_else(|| Error::invalid_request("refresh_token is required"))?;
    let requested_scopes = form.scopes();

    let result = refresh::redeem(storage, connectors, &client.id, raw, requested_scopes.as_deref()).await?;

    let (_, audience) = auth_request::expand_audience(storage, &client.id, &result.scopes).await?;
    let azp = (audience.len() > 1).then(|| client.id.clone());
    let mut body = bundle::sign(keys, &client.id, audience, azp, &result.scopes, result.nonce, &result.claims, &result.connector_id).await?;
    body["refresh_token"] = Value::String(result.handle.format());
    Ok(body)
}

/// spec §4.4/RFC 8628 §3.4: a thin wrapper over `device::poll`, translating
/// its outcome into the wire-level `authorization_pending`/`slow_down`
/// errors or the stored completion body.
async fn device_code_grant(form: &TokenForm, storage: &Arc<dyn Storage>) -> ApiResult<Value> {
    let device_code = form.device_code.as_ref().ok_or_else(|| Error::invalid_request("device_code is required"))?;
    match device::poll(storage, device_code).await? {
        device::PollOutcome::Pending => Err(Error::oidc(ErrorKind::AuthorizationPending, "authorization pending")),
        device::PollOutcome::SlowDown => Err(Error::oidc(ErrorKind::SlowDown, "polling too fast, slow down")),
        device::PollOutcome::Complete(body) => Ok(body),
    }
}

const TOKEN_TYPE_ACCESS: &str = "urn:ietf:params:oauth:token-type:access_token";
const TOKEN_TYPE_ID: &str = "urn:ietf:params:oauth:token-type:id_token";

/// RFC 8693: exchanges a connector-specific `subject_token` for a token
/// scoped to the requesting client, via the connector's
/// `TokenIdentityConnector` capability. No refresh token is minted — the
/// exchanged identity has no standing offline session of its own (spec §4,
/// component F Non-goals).
///
/// spec §4.5: the minted audience is the requested `audience` when present,
/// else the authenticating client; `requested_token_type` (default
/// `access_token`) selects which kind of token is returned. Per §9's Open
/// Question resolution, an explicit `audience` widens `aud` the same way a
/// cross-client audience scope does — only if the named peer lists this
/// client in its `trusted_peers`.
async fn token_exchange_grant(form: &TokenForm, storage: &Arc<dyn Storage>, connectors: &ConnectorRegistry, keys: &KeyManager) -> ApiResult<Value> {
    let client_id = form.client_id.as_ref().ok_or_else(|| Error::invalid_request("client_id is required"))?;
    let client = storage.get_client(client_id).await.map_err(|_| Error::invalid_client("unknown client_id"))?;
    let connector_id = form.connector_id.as_ref().ok_or_else(|| Error::invalid_request("connector_id is required"))?;
    let subject_token = form.subject_token.as_ref().ok_or_else(|| Error::invalid_request("subject_token is required"))?;
    let subject_token_type = form.subject_token_type.as_deref().unwrap_or(TOKEN_TYPE_ACCESS);

    let (instance, _) = connectors.get(connector_id).await?;
    let token_identity = instance.require_token_identity()?;
    let identity = token_identity.token_identity(subject_token, subject_token_type).await?;
    let claims = device::claims_from_identity(&identity);
    let scopes = form.scopes().unwrap_or_else(|| vec!["openid".to_string()]);

    let audience = match &form.audience {
        Some(requested) if requested != &client.id => {
            let peer = storage.get_client(requested).await.map_err(|_| Error::invalid_scope(format!("unknown audience `{requested}`")))?;
            if !peer.trusted_peers.iter().any(|p| p == &client.id) {
                return Err(Error::invalid_scope(format!("`{requested}` does not trust `{}`", client.id)));
            }
            vec![client.id.clone(), requested.clone()]
        }
        _ => vec![client.id.clone()],
    };
    let azp = (audience.len() > 1).then(|| client.id.clone());

    let requested_token_type = form.requested_token_type.as_deref().unwrap_or(TOKEN_TYPE_ACCESS);
    let signer = crate::token::TokenSigner::new(keys);
    let sub = crate::token::subject_for(&claims.user_id, connector_id);

    let (issued_token, issued_token_type, wire_token_type) = match requested_token_type {
        TOKEN_TYPE_ID => {
            let federated_claims = json!({ "connector_id": connector_id });
            let id_token = signer.sign_id_token(&sub, audience, azp, None, &claims, None, Some(federated_claims)).await?;
            (id_token, TOKEN_TYPE_ID, "N_A")
        }
        TOKEN_TYPE_ACCESS => {
            let access_token = signer.sign_access_token(&sub, audience, &scopes, &client.id, &claims).await?;
            (access_token, TOKEN_TYPE_ACCESS, "Bearer")
        }
        other => return Err(Error::invalid_request(format!("unsupported requested_token_type `{other}`"))),
    };

    Ok(json!({
        "access_token": issued_token,
        "issued_token_type": issued_token_type,
        "token_type": wire_token_type,
        "expires_in": CONFIG.access_token_lifetime_secs(),
        "scope": scopes.join(" "),
    }))
}

/// spec §4.5: the resource-owner password grant, gated per-client by
/// `allow_password_grant` (most clients should use the authorization_code
/// flow; this exists for legacy/CLI clients that can't open a browser).
async fn password_grant(form: &TokenForm, headers: &HeaderMap<'_>, storage: &Arc<dyn Storage>, connectors: &ConnectorRegistry, keys: &KeyManager) -> ApiResult<Value> {
    let client = client_auth::authenticate(storage, headers, form.client_id.as_deref(), form.client_secret.as_deref()).await?;
    if !client.allow_password_grant {
        return Err(Error::unauthorized_client("client is not permitted to use the password grant"));
    }
    let username = form.username.as_ref().ok_or_else(|| Error::invalid_request("username is required"))?;
    let password = form.password.as_ref().ok_or_else(|| Error::invalid_request("password is required"))?;
    let connector_id = form.connector_id.as_deref().unwrap_or("mock");

    let (instance, _) = connectors.get(connector_id).await?;
    let password_connector = instance.require_password()?;
    let scopes = form.scopes().unwrap_or_else(|| vec!["openid".to_string()]);
    let identity = password_connector
        .login(&scopes, username, password)
        .await?
        .ok_or_else(|| Error::invalid_grant("invalid username or password"))?;
    let claims = device::claims_from_identity(&identity);

    let audience = vec![client.id.clone()];
    bundle::mint(keys, storage, &client.id, audience, None, &scopes, None, &claims, connector_id, (!identity.connector_data.is_empty()).then_some(identity.connector_data)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto, secrets,
        storage::{AuthCode, Claims, Client, Connector},
    };
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client as TestClient;

    async fn rocket_with_fixtures(allow_password: bool) -> (rocket::Rocket<rocket::Build>, Arc<dyn Storage>) {
        let storage: Arc<dyn Storage> = Arc::new(crate::storage::memory::MemoryStorage::new());
        let secret_hash = secrets::hash_client_secret("s3cret").unwrap();
        storage
            .create_client(Client {
                id: "client-a".into(),
                secret_hash: Some(secret_hash),
                public: false,
                redirect_uris: vec!["https://rp.example.com/cb".into()],
                trusted_peers: vec![],
                name: "client-a".into(),
                logo_url: None,
                allow_password_grant: allow_password,
                skip_approval_screen: false,
            })
            .await
            .unwrap();
        storage.create_connector(Connector { id: "mock".into(), connector_type: "mock".into(), name: "mock".into(), resource_version: 1, config: serde_json::json!({}) }).await.unwrap();
        let connectors = Arc::new(ConnectorRegistry::new(storage.clone()));
        let keys = Arc::new(KeyManager::new(storage.clone()));
        let rocket = rocket::build().manage(storage.clone()).manage(connectors).manage(keys).mount("/", routes());
        (rocket, storage)
    }

    #[tokio::test]
    async fn authorization_code_grant_mints_a_bundle() {
        let (rocket, storage) = rocket_with_fixtures(false).await;
        storage
            .create_auth_code(AuthCode {
                id: "code-1".into(),
                client_id: "client-a".into(),
                scopes: vec!["openid".into()],
                nonce: None,
                redirect_uri: "https://rp.example.com/cb".into(),
                claims: Claims { user_id: "u1".into(), username: "alice".into(), ..Default::default() },
                connector_id: "mock".into(),
                connector_data: None,
                code_challenge: None,
                code_challenge_method: None,
                expiry: crate::util::now_secs() + 60,
            })
            .await
            .unwrap();

        let client = TestClient::tracked(rocket).await.unwrap();
        let response = client
            .post("/token")
            .header(ContentType::Form)
            .body("grant_type=authorization_code&code=code-1&redirect_uri=https://rp.example.com/cb&client_id=client-a&client_secret=s3cret")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        assert!(body["access_token"].is_string());
        assert!(body["id_token"].is_string());

        // The code is single-use.
        assert!(storage.get_auth_code("code-1").await.is_err());
    }

    #[tokio::test]
    async fn authorization_code_grant_with_pkce_rejects_wrong_verifier() {
        let (rocket, storage) = rocket_with_fixtures(false).await;
        storage
            .create_auth_code(AuthCode {
                id: "code-pkce".into(),
                client_id: "client-a".into(),
                scopes: vec!["openid".into()],
                nonce: None,
                redirect_uri: "https://rp.example.com/cb".into(),
                claims: Claims { user_id: "u1".into(), username: "alice".into(), ..Default::default() },
                connector_id: "mock".into(),
                connector_data: None,
                code_challenge: Some(crypto::pkce_challenge("correct-verifier", "S256")),
                code_challenge_method: Some("S256".into()),
                expiry: crate::util::now_secs() + 60,
            })
            .await
            .unwrap();

        let client = TestClient::tracked(rocket).await.unwrap();
        let response = client
            .post("/token")
            .header(ContentType::Form)
            .body("grant_type=authorization_code&code=code-pkce&redirect_uri=https://rp.example.com/cb&client_id=client-a&client_secret=s3cret&code_verifier=wrong-verifier")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
    }

    #[tokio::test]
    async fn password_grant_requires_opt_in() {
        let (rocket, _storage) = rocket_with_fixtures(false).await;
        let client = TestClient::tracked(rocket).await.unwrap();
        let response = client
            .post("/token")
            .header(ContentType::Form)
            .body("grant_type=password&username=alice&password=pw&client_id=client-a&client_secret=s3cret")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["error"], "unauthorized_client");
    }

    /// spec §8 scenario 4: a code carrying a cross-client audience scope
    /// widens the minted `aud` to include the trusting peer and pins `azp`
    /// to the requesting client.
    #[tokio::test]
    async fn authorization_code_grant_widens_audience_for_trusted_peer() {
        let (rocket, storage) = rocket_with_fixtures(false).await;
        storage
            .create_client(Client {
                id: "client-b".into(),
                secret_hash: None,
                public: true,
                redirect_uris: vec![],
                trusted_peers: vec!["client-a".into()],
                name: "client-b".into(),
                logo_url: None,
                allow_password_grant: false,
                skip_approval_screen: false,
            })
            .await
            .unwrap();
        storage
            .create_auth_code(AuthCode {
                id: "code-aud".into(),
                client_id: "client-a".into(),
                scopes: vec!["openid".into(), "audience:server:client_id:client-b".into()],
                nonce: None,
                redirect_uri: "https://rp.example.com/cb".into(),
                claims: Claims { user_id: "u1".into(), username: "alice".into(), ..Default::default() },
                connector_id: "mock".into(),
                connector_data: None,
                code_challenge: None,
                code_challenge_method: None,
                expiry: crate::util::now_secs() + 60,
            })
            .await
            .unwrap();

        let client = TestClient::tracked(rocket).await.unwrap();
        let response = client
            .post("/token")
            .header(ContentType::Form)
            .body("grant_type=authorization_code&code=code-aud&redirect_uri=https://rp.example.com/cb&client_id=client-a&client_secret=s3cret")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        let id_token = body["id_token"].as_str().unwrap();
        let payload = id_token.split('.').nth(1).unwrap();
        let bytes = data_encoding::BASE64URL_NOPAD.decode(payload.as_bytes()).unwrap();
        let claims: crate::token::IdTokenClaims = serde_json::from_slice(&bytes).unwrap();
        let aud = claims.aud.as_vec();
        assert!(aud.contains(&"client-a".to_string()));
        assert!(aud.contains(&"client-b".to_string()));
        assert_eq!(claims.azp.as_deref(), Some("client-a"));
    }

    /// A worked `TokenIdentityConnector` for the token-exchange tests below:
    /// treats the `subject_token` itself as an already-verified username.
    struct ExchangeMock;

    #[rocket::async_trait]
    impl crate::connector::TokenIdentityConnector for ExchangeMock {
        async fn token_identity(&self, subject_token: &str, _subject_token_type: &str) -> ApiResult<crate::connector::Identity> {
            Ok(crate::connector::Identity { user_id: format!("sub-{subject_token}"), username: subject_token.to_string(), ..Default::default() })
        }
    }

    async fn rocket_with_exchange_fixture() -> (rocket::Rocket<rocket::Build>, Arc<dyn Storage>) {
        let (rocket, storage) = rocket_with_fixtures(false).await;
        storage
            .create_connector(Connector { id: "exchange".into(), connector_type: "exchange-mock".into(), name: "exchange".into(), resource_version: 1, config: serde_json::json!({}) })
            .await
            .unwrap();
        let connectors: &Arc<ConnectorRegistry> = rocket.state().unwrap();
        connectors.register_factory(
            "exchange-mock",
            Arc::new(|_| {
                Ok(crate::connector::ConnectorInstance { id: String::new(), token_identity: Some(Arc::new(ExchangeMock)), ..Default::default() })
            }),
        );
        (rocket, storage)
    }

    /// spec §4.5: with no `audience` parameter, the exchanged token's `aud`
    /// defaults to the authenticating client.
    #[tokio::test]
    async fn token_exchange_grant_defaults_audience_to_the_requesting_client() {
        let (rocket, _storage) = rocket_with_exchange_fixture().await;
        let client = TestClient::tracked(rocket).await.unwrap();
        let response = client
            .post("/token")
            .header(ContentType::Form)
            .body("grant_type=urn:ietf:params:oauth:grant-type:token-exchange&client_id=client-a&client_secret=s3cret&connector_id=exchange&subject_token=alice")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["issued_token_type"], "urn:ietf:params:oauth:token-type:access_token");
        assert_eq!(body["token_type"], "Bearer");
        let access_token = body["access_token"].as_str().unwrap();
        let claims = crate::token::verify_access_token(rocket_keys_from(&_storage).await.as_ref(), access_token, Some("client-a")).await.unwrap();
        assert_eq!(claims.aud.as_vec(), vec!["client-a".to_string()]);
    }

    async fn rocket_keys_from(storage: &Arc<dyn Storage>) -> Arc<KeyManager> {
        Arc::new(KeyManager::new(storage.clone()))
    }

    /// spec §4.5/§9: an explicit `audience` widens `aud` to include the peer
    /// only if that peer lists this client in its `trusted_peers`.
    #[tokio::test]
    async fn token_exchange_grant_widens_audience_for_trusted_peer() {
        let (rocket, storage) = rocket_with_exchange_fixture().await;
        storage
            .create_client(Client {
                id: "client-b".into(),
                secret_hash: None,
                public: true,
                redirect_uris: vec![],
                trusted_peers: vec!["client-a".into()],
                name: "client-b".into(),
                logo_url: None,
                allow_password_grant: false,
                skip_approval_screen: false,
            })
            .await
            .unwrap();

        let client = TestClient::tracked(rocket).await.unwrap();
        let response = client
            .post("/token")
            .header(ContentType::Form)
            .body("grant_type=urn:ietf:params:oauth:grant-type:token-exchange&client_id=client-a&client_secret=s3cret&connector_id=exchange&subject_token=alice&audience=client-b")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        let access_token = body["access_token"].as_str().unwrap();
        let claims = crate::token::verify_access_token(rocket_keys_from(&storage).await.as_ref(), access_token, None).await.unwrap();
        let aud = claims.aud.as_vec();
        assert!(aud.contains(&"client-a".to_string()));
        assert!(aud.contains(&"client-b".to_string()));
    }

    #[tokio::test]
    async fn token_exchange_grant_rejects_untrusted_audience() {
        let (rocket, storage) = rocket_with_exchange_fixture().await;
        storage
            .create_client(Client {
                id: "client-c".into(),
                secret_hash: None,
                public: true,
                redirect_uris: vec![],
                trusted_peers: vec![],
                name: "client-c".into(),
                logo_url: None,
                allow_password_grant: false,
                skip_approval_screen: false,
            })
            .await
            .unwrap();

        let client = TestClient::tracked(rocket).await.unwrap();
        let response = client
            .post("/token")
            .header(ContentType::Form)
            .body("grant_type=urn:ietf:params:oauth:grant-type:token-exchange&client_id=client-a&client_secret=s3cret&connector_id=exchange&subject_token=alice&audience=client-c")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["error"], "invalid_scope");
    }

    /// spec §4.5: `requested_token_type` selects which kind of token is
    /// minted; `id_token` yields a signed ID token rather than an access token.
    #[tokio::test]
    async fn token_exchange_grant_honors_requested_token_type_id_token() {
        let (rocket, _storage) = rocket_with_exchange_fixture().await;
        let client = TestClient::tracked(rocket).await.unwrap();
        let response = client
            .post("/token")
            .header(ContentType::Form)
            .body(
                "grant_type=urn:ietf:params:oauth:grant-type:token-exchange&client_id=client-a&client_secret=s3cret&connector_id=exchange&subject_token=alice&requested_token_type=urn:ietf:params:oauth:token-type:id_token",
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["issued_token_type"], "urn:ietf:params:oauth:token-type:id_token");
        assert_eq!(body["token_type"], "N_A");
    }
}

//
// Auth-request state machine (E)
//
// Pure(-ish) functions over the `Storage` façade implementing spec §4.4's
// `New -> AwaitingLogin -> LoggedIn -> AwaitingApproval -> Approved` walk.
// HTTP glue (parsing query strings, issuing redirects) lives in
// `api::auth`; this module owns validation, persistence and the
// cross-client audience / PKCE / HMAC-continuity invariants so they're
// testable without a running server.
//
use std::collections::HashSet;
use std::sync::Arc;

use crate::{
    config::CONFIG,
    crypto,
    error::{ApiResult, Error},
    storage::{AuthCode, AuthRequest, Claims, Client, Storage},
    util::now_secs,
};

const SUPPORTED_RESPONSE_TYPES: &[&str] = &["code", "token", "id_token"];
const CROSS_CLIENT_PREFIX: &str = "audience:server:client_id:";

#[derive(Debug, Clone)]
pub struct NewAuthRequestParams {
    pub client_id: String,
    pub response_types: Vec<String>,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    pub nonce: Option<String>,
    pub state: Option<String>,
    pub force_approval: bool,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// A request that failed validation early enough that the `redirect_uri`
/// itself is not yet trusted: the caller must render an error page rather
/// than redirect (spec §4.4 step 1, §7 ClientError).
pub fn untrusted_error(message: impl Into<String>) -> Error {
    Error::invalid_request(message)
}

/// Special redirect URIs accepted for public clients with no registered
/// `redirect_uris` (spec §4.4, §8 testable property). Only implicit when
/// the client's own list is empty.
fn is_special_public_redirect(uri: &str) -> bool {
    if uri == "urn:ietf:wg:oauth:2.0:oob" || uri == "/device/callback" {
        return true;
    }
    let Ok(parsed) = url::Url::parse(uri) else { return false };
    let is_loopback_scheme = parsed.scheme() == "http" || parsed.scheme() == "https";
    is_loopback_scheme && matches!(parsed.host_str(), Some("localhost") | Some("127.0.0.1") | Some("::1"))
}

pub fn validate_redirect_uri(client: &Client, uri: &str) -> bool {
    if !client.redirect_uris.is_empty() {
        return client.redirect_uris.iter().any(|r| r == uri);
    }
    client.public && is_special_public_redirect(uri)
}

/// Splits requested scopes into the plain set and cross-client audience
/// peers (`audience:server:client_id:<peer>`), validating that each peer
/// lists `client_id` in its `trusted_peers` (spec §4.4, Glossary).
pub async fn expand_audience(storage: &Arc<dyn Storage>, client_id: &str, scopes: &[String]) -> ApiResult<(Vec<String>, Vec<String>)> {
    let mut plain = Vec::new();
    let mut audience = vec![client_id.to_string()];

    for scope in scopes {
        if let Some(peer) = scope.strip_prefix(CROSS_CLIENT_PREFIX) {
            let peer_client = storage.get_client(peer).await.map_err(|_| Error::invalid_scope(format!("unknown audience peer `{peer}`")))?;
            if !peer_client.trusted_peers.iter().any(|p| p == client_id) {
                return Err(Error::invalid_scope(format!("`{peer}` does not trust `{client_id}`")));
            }
            audience.push(peer.to_string());
        } else {
            plain.push(scope.clone());
        }
    }
    Ok((plain, audience))
}

fn validate_scopes(scopes: &[String], supported: &HashSet<String>) -> ApiResult<()> {
    if !scopes.iter().any(|s| s == "openid") {
        return Err(Error::invalid_scope("scope must include `openid`"));
    }
    for scope in scopes {
        if scope.starts_with(CROSS_CLIENT_PREFIX) {
            continue;
        }
        if !supported.contains(scope) {
            return Err(Error::invalid_scope(format!("unsupported scope `{scope}`")));
        }
    }
    Ok(())
}

fn validate_response_types(response_types: &[String], nonce: &Option<String>) -> ApiResult<()> {
    if response_types.is_empty() {
        return Err(Error::invalid_request("response_type is required"));
    }
    for rt in response_types {
        if !SUPPORTED_RESPONSE_TYPES.contains(&rt.as_str()) {
            return Err(Error::oidc(crate::error::ErrorKind::UnsupportedResponseType, format!("unsupported response_type `{rt}`")));
        }
    }
    let wants_implicit = response_types.iter().any(|t| t == "token" || t == "id_token");
    if wants_implicit && nonce.is_none() {
        return Err(Error::invalid_request("nonce is required for token/id_token response types"));
    }
    if response_types.iter().any(|t| t == "token") && !response_types.iter().any(|t| t == "id_token" || t == "code") {
        return Err(Error::invalid_request("`token` alone is not a supported response_type"));
    }
    Ok(())
}

fn validate_pkce(method: &Option<String>) -> ApiResult<String> {
    match method.as_deref() {
        None => Ok("plain".to_string()),
        Some("plain") => Ok("plain".to_string()),
        Some("S256") => Ok("S256".to_string()),
        Some(other) => Err(Error::invalid_request(format!("unsupported code_challenge_method `{other}`"))),
    }
}

/// `New -> AwaitingLogin` (spec §4.4 step 1). Validates and persists a fresh
/// `AuthRequest`, returning it with a freshly generated `id`/`hmac_key`.
pub async fn create(storage: &Arc<dyn Storage>, params: NewAuthRequestParams) -> ApiResult<AuthRequest> {
    let client = storage.get_client(&params.client_id).await.map_err(|_| untrusted_error("unknown client_id"))?;

    if !validate_redirect_uri(&client, &params.redirect_uri) {
        return Err(untrusted_error("redirect_uri is not registered for this client"));
    }

    // From here on `redirect_uri` is trusted: remaining failures should
    // redirect-with-error instead of rendering (spec §7).
    let run = || async {
        validate_response_types(&params.response_types, &params.nonce)?;
        let supported: HashSet<String> = CONFIG.scopes().into_iter().collect();
        validate_scopes(&params.scopes, &supported)?;
        let (_, _) = expand_audience(storage, &params.client_id, &params.scopes).await?;
        let code_challenge_method = params.code_challenge.as_ref().map(|_| validate_pkce(&params.code_challenge_method)).transpose()?;

        let hmac_key = crypto::get_random(32)?;
        let id = crypto::generate_opaque_token()?;
        let req = AuthRequest {
            id,
            client_id: params.client_id.clone(),
            response_types: params.response_types.clone(),
            scopes: params.scopes.clone(),
            redirect_uri: params.redirect_uri.clone(),
            nonce: params.nonce.clone(),
            state: params.state.clone(),
            force_approval: params.force_approval,
            expiry: now_secs() + CONFIG.auth_request_lifetime_secs(),
            logged_in: false,
            connector_id: None,
            connector_data: None,
            claims: None,
            code_challenge: params.code_challenge.clone(),
            code_challenge_method,
            hmac_key,
        };
        storage.create_auth_request(req.clone()).await?;
        Ok(req)
    };

    match run().await {
        Ok(req) => Ok(req),
        Err(e) => Err(e.with_redirect(&params.redirect_uri, params.state.clone())),
    }
}

/// A continuity tag proving the bearer legitimately holds the given
/// `auth_req_id` (spec §9 Design Notes: "the server never trusts the `req`
/// parameter without this tag").
pub fn continuity_tag(req: &AuthRequest) -> String {
    crypto::hmac_sign(&req.hmac_key, &req.id)
}

pub fn verify_continuity(req: &AuthRequest, tag: &str) -> bool {
    crypto::hmac_verify(&req.hmac_key, &req.id, tag)
}

/// `AwaitingLogin -> LoggedIn` (spec §4.4 step 2): records the identity the
/// connector resolved and flips `logged_in`.
pub async fn mark_logged_in(storage: &Arc<dyn Storage>, req_id: &str, connector_id: &str, identity: &crate::connector::Identity) -> ApiResult<AuthRequest> {
    let connector_id = connector_id.to_string();
    let claims = Claims {
        user_id: identity.user_id.clone(),
        username: identity.username.clone(),
        preferred_username: identity.preferred_username.clone(),
        email: identity.email.clone(),
        email_verified: identity.email_verified,
        groups: identity.groups.clone(),
    };
    let connector_data = identity.connector_data.clone();
    storage
        .update_auth_request(
            req_id,
            Box::new(move |mut req| {
                req.connector_id = Some(connector_id.clone());
                req.connector_data = if connector_data.is_empty() { None } else { Some(connector_data.clone()) };
                req.claims = Some(claims.clone());
                req.logged_in = true;
                Ok(req)
            }),
        )
        .await
}

pub enum Approval {
    Granted(AuthCode, String),
    /// `(redirect_uri, state)` — the auth request is gone by the time the
    /// caller needs to build the error redirect, so both survive it here.
    Denied(String, String),
}

/// `LoggedIn -> AwaitingApproval -> Approved` (spec §4.4 step 3). Skips the
/// approval screen when `skip_approval_screen` is set on the client or the
/// caller passes `force_skip` (trusted RP / second idempotent submission
/// semantics live in `api::auth`, not here).
pub async fn approve(storage: &Arc<dyn Storage>, req_id: &str, tag: &str, consented: bool) -> ApiResult<Approval> {
    let req = storage.get_auth_request(req_id).await.map_err(|_| Error::access_denied("auth request not found or already consumed"))?;

    if now_secs() > req.expiry {
        storage.delete_auth_request(req_id).await.ok();
        return Err(Error::invalid_request("auth request expired"));
    }
    if !verify_continuity(&req, tag) {
        return Err(Error::invalid_request("invalid continuity tag"));
    }
    if !req.logged_in {
        return Err(Error::invalid_request("auth request has not completed login"));
    }

    if !consented {
        storage.delete_auth_request(req_id).await.ok();
        return Ok(Approval::Denied(req.redirect_uri.clone(), req.state.clone().unwrap_or_default()));
    }

    let claims = req.claims.clone().ok_or_else(|| Error::server_error("logged_in auth request missing claims"))?;
    let code = AuthCode {
        id: crypto::generate_opaque_token()?,
        client_id: req.client_id.clone(),
        scopes: req.scopes.clone(),
        nonce: req.nonce.clone(),
        redirect_uri: req.redirect_uri.clone(),
        claims,
        connector_id: req.connector_id.clone().unwrap_or_default(),
        connector_data: req.connector_data.clone(),
        code_challenge: req.code_challenge.clone(),
        code_challenge_method: req.code_challenge_method.clone(),
        expiry: now_secs() + 60,
    };
    storage.create_auth_code(code.clone()).await?;
    storage.delete_auth_request(req_id).await?;

    Ok(Approval::Granted(code, req.state.clone().unwrap_or_default()))
}

/// Whether `client_id` should bypass the consent screen entirely (spec
/// §4.4: "if `skip_approval_screen` is true or the RP is trusted").
pub fn skips_approval(client: &Client) -> bool {
    client.skip_approval_screen
}

impl Error {
    fn with_redirect(self, redirect_uri: &str, state: Option<String>) -> Self {
        match self {
            Error::Oidc(o) => Error::Oidc(o.redirect(redirect_uri, state)),
            other => other,
        }
    }
}

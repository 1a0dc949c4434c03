//
// Discovery + JWKS (K)
//
// Both documents are served straight off the key manager's cache and
// `Config`, so they stay cheap even under load (spec §4.8). Grounded on the
// teacher's `Cached<R>` responder in `util.rs` for the `max-age` wrapping.
//
use std::sync::Arc;

use rocket::{get, serde::json::Json, Route, State};
use serde_json::{json, Value};

use crate::{config::CONFIG, error::ApiResult, keys::KeyManager, util::Cached};

pub fn routes() -> Vec<Route> {
    rocket::routes![discovery, jwks, healthz]
}

#[get("/.well-known/openid-configuration")]
async fn discovery(keys: &State<Arc<KeyManager>>) -> ApiResult<Cached<Json<Value>>> {
    let issuer = CONFIG.issuer();
    let alg = keys.signing_algorithm().await?;
    let max_age = keys.cache_max_age().await?;

    let doc = json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/auth"),
        "token_endpoint": format!("{issuer}/token"),
        "userinfo_endpoint": format!("{issuer}/userinfo"),
        "jwks_uri": format!("{issuer}/keys"),
        "introspection_endpoint": format!("{issuer}/token/introspect"),
        "device_authorization_endpoint": format!("{issuer}/device/code"),
        "registration_endpoint": format!("{issuer}/client"),
        "grant_types_supported": CONFIG.grant_types(),
        "response_types_supported": ["code", "token", "id_token", "code token", "code id_token", "token id_token", "code token id_token"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": [alg],
        "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post"],
        "code_challenge_methods_supported": ["S256", "plain"],
        "scopes_supported": CONFIG.scopes(),
        "claims_supported": CONFIG.claims(),
    });

    Ok(Cached::ttl(Json(doc), max_age))
}

#[get("/keys")]
async fn jwks(keys: &State<Arc<KeyManager>>) -> ApiResult<Cached<Json<Value>>> {
    let max_age = keys.cache_max_age().await?;
    Ok(Cached::ttl(Json(keys.jwks().await?), max_age))
}

#[get("/healthz")]
fn healthz() -> &'static str {
    "ok"
}

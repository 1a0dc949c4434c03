//
// Token introspection + userinfo (I)
//
// `/token/introspect` (RFC 7662) tries the presented token as a signed
// access-token JWT first, then falls back to decoding it as an opaque
// refresh-token envelope (spec §4.7) — the two are the only token shapes
// this crate ever hands out. A client authentication failure is reported the
// same way an inactive token is (`{"active": false}`, status 200) rather
// than `invalid_client`, per spec §7's AuthnError carve-out for this one
// endpoint: telling a caller "your credentials are wrong" vs. "the token you
// asked about doesn't exist" would leak which is true.
//
// `/userinfo` only ever deals with the JWT shape: it verifies the access
// token's signature via the key manager and echoes its claims back (spec
// §4.7), with no separate claims-store round trip.
//
use std::sync::Arc;

use rocket::{form::Form, get, post, request::Request, serde::json::Json, FromForm, Route, State};
use serde_json::{json, Value};

use crate::{
    api::client_auth,
    config::CONFIG,
    error::ApiResult,
    keys::KeyManager,
    refresh::RefreshHandle,
    ratelimit,
    storage::Storage,
    token,
    util::ClientIp,
};

pub fn routes() -> Vec<Route> {
    rocket::routes![introspect, userinfo]
}

#[derive(FromForm)]
struct IntrospectForm {
    token: String,
    token_type_hint: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[post("/token/introspect", data = "<form>")]
async fn introspect(
    form: Form<IntrospectForm>,
    req: &Request<'_>,
    ip: ClientIp,
    storage: &State<Arc<dyn Storage>>,
    keys: &State<Arc<KeyManager>>,
) -> ApiResult<Json<Value>> {
    ratelimit::check_token_endpoint(&ip.0)?;
    let form = form.into_inner();

    if client_auth::authenticate(storage, req.headers(), form.client_id.as_deref(), form.client_secret.as_deref()).await.is_err() {
        return Ok(Json(json!({ "active": false })));
    }

    if let Ok(claims) = token::verify_access_token(keys, &form.token, None).await {
        return Ok(Json(json!({
            "active": true,
            "scope": claims.scope,
            "client_id": claims.client_id,
            "sub": claims.sub,
            "aud": claims.aud.as_vec(),
            "iss": claims.iss,
            "exp": claims.exp,
            "iat": claims.iat,
            "token_type": "Bearer",
        })));
    }

    if let Ok(handle) = RefreshHandle::parse(&form.token) {
        if let Ok(stored) = storage.get_refresh_token(&handle.id).await {
            let current = crate::crypto::ct_eq(handle.secret.as_bytes(), stored.token.as_bytes());
            let obsolete = stored.obsolete_token.as_ref().map(|old| crate::crypto::ct_eq(handle.secret.as_bytes(), old.as_bytes())).unwrap_or(false);
            if current || obsolete {
                let sub = token::subject_for(&stored.claims.user_id, &stored.connector_id);
                return Ok(Json(json!({
                    "active": true,
                    "scope": stored.scopes.join(" "),
                    "client_id": stored.client_id,
                    "sub": sub,
                    "iss": CONFIG.issuer(),
                    "iat": stored.created_at,
                    "exp": stored.created_at + CONFIG.refresh_absolute_lifetime_secs(),
                    "token_type": "Offline",
                })));
            }
        }
    }

    Ok(Json(json!({ "active": false })))
}

struct Bearer(String);

#[rocket::async_trait]
impl<'r> rocket::request::FromRequest<'r> for Bearer {
    type Error = crate::error::Error;

    async fn from_request(req: &'r rocket::Request<'_>) -> rocket::request::Outcome<Self, Self::Error> {
        use rocket::outcome::Outcome;
        let header = req.headers().get_one("Authorization").and_then(|h| h.strip_prefix("Bearer "));
        match header {
            Some(token) => Outcome::Success(Bearer(token.to_string())),
            None => Outcome::Error((rocket::http::Status::Unauthorized, crate::error::Error::oidc(crate::error::ErrorKind::InvalidClient, "missing bearer token"))),
        }
    }
}

#[get("/userinfo")]
async fn userinfo(bearer: Bearer, keys: &State<Arc<KeyManager>>) -> ApiResult<Json<Value>> {
    let claims = token::verify_access_token(keys, &bearer.0, None).await?;
    Ok(Json(serde_json::to_value(claims)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyManager;
    use crate::storage::{Claims, Client};
    use rocket::http::{ContentType, Header, Status};
    use rocket::local::asynchronous::Client as TestClient;

    async fn rocket_with_fixtures() -> rocket::Rocket<rocket::Build> {
        let storage: Arc<dyn Storage> = Arc::new(crate::storage::memory::MemoryStorage::new());
        storage
            .create_client(Client {
                id: "client-a".into(),
                secret_hash: None,
                public: true,
                redirect_uris: vec![],
                trusted_peers: vec![],
                name: "client-a".into(),
                logo_url: None,
                allow_password_grant: false,
                skip_approval_screen: true,
            })
            .await
            .unwrap();
        let keys = Arc::new(KeyManager::new(storage.clone()));
        rocket::build().manage(storage).manage(keys).mount("/", routes())
    }

    async fn sample_access_token(rocket: &rocket::Rocket<rocket::Build>) -> String {
        let keys: &Arc<KeyManager> = rocket.state().unwrap();
        let signer = token::TokenSigner::new(keys);
        let claims = Claims { user_id: "u1".into(), username: "alice".into(), preferred_username: "alice".into(), email: "alice@example.com".into(), email_verified: true, groups: vec![] };
        signer.sign_access_token(&token::subject_for("u1", "mock"), vec!["client-a".into()], &["openid".into()], "client-a", &claims).await.unwrap()
    }

    #[tokio::test]
    async fn introspect_reports_active_jwt() {
        let built = rocket_with_fixtures().await;
        let access_token = sample_access_token(&built).await;
        let client = TestClient::tracked(built).await.unwrap();

        let response = client
            .post("/token/introspect")
            .header(ContentType::Form)
            .body(format!("token={access_token}&client_id=client-a"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["active"], true);
        assert_eq!(body["client_id"], "client-a");
    }

    #[tokio::test]
    async fn introspect_reports_inactive_for_garbage_token() {
        let client = TestClient::tracked(rocket_with_fixtures().await).await.unwrap();
        let response = client
            .post("/token/introspect")
            .header(ContentType::Form)
            .body("token=not-a-real-token&client_id=client-a")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["active"], false);
    }

    #[tokio::test]
    async fn userinfo_echoes_claims_from_bearer_token() {
        let built = rocket_with_fixtures().await;
        let access_token = sample_access_token(&built).await;
        let client = TestClient::tracked(built).await.unwrap();

        let response = client.get("/userinfo").header(Header::new("Authorization", format!("Bearer {access_token}"))).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["sub"], token::subject_for("u1", "mock"));
    }

    #[tokio::test]
    async fn userinfo_without_bearer_is_unauthorized() {
        let client = TestClient::tracked(rocket_with_fixtures().await).await.unwrap();
        let response = client.get("/userinfo").dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
    }
}

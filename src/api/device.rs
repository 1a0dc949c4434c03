//
// Device authorization flow HTTP surface (H, RFC 8628)
//
// `/device/code` is the only leg a confidential/public device client talks
// to directly; the rest of the flow happens on a second screen via
// `/device`/`/device/auth/verify_code`, which hand off into the same
// `auth_request`/`api::auth` machinery a browser RP uses — see
// `api::auth::DEVICE_CALLBACK_URI` for how that handoff completes.
//
use std::sync::Arc;

use rocket::{form::Form, get, post, serde::json::Json, FromForm, Route, State};
use serde_json::{json, Value};

use crate::{
    api::auth::{self, DEVICE_CALLBACK_URI},
    auth_request::{self, NewAuthRequestParams},
    connector::ConnectorRegistry,
    device,
    error::{ApiResult, Error},
    ratelimit,
    storage::Storage,
    util::ClientIp,
};

pub fn routes() -> Vec<Route> {
    rocket::routes![device_code, verify_page, verify_code, device_token]
}

#[derive(FromForm)]
struct DeviceCodeForm {
    client_id: String,
    scope: String,
}

#[post("/device/code", data = "<form>")]
async fn device_code(form: Form<DeviceCodeForm>, storage: &State<Arc<dyn Storage>>) -> ApiResult<Json<Value>> {
    let form = form.into_inner();
    storage.get_client(&form.client_id).await.map_err(|_| Error::invalid_client("unknown client_id"))?;
    let scopes: Vec<String> = form.scope.split_whitespace().map(str::to_string).collect();

    let start = device::start(storage, &form.client_id, scopes).await?;
    Ok(Json(json!({
        "device_code": start.device_code,
        "user_code": start.user_code,
        "verification_uri": start.verification_uri,
        "verification_uri_complete": start.verification_uri_complete,
        "expires_in": start.expires_in,
        "interval": start.interval,
    })))
}

/// Renders (as JSON, per this crate's Non-goal on HTML UI — see `api::auth`)
/// the verification prompt. When `user_code` is already known (the
/// `verification_uri_complete` case) this jumps straight into starting the
/// login the same way `/auth` does.
#[get("/device?<user_code>")]
async fn verify_page(
    user_code: Option<String>,
    storage: &State<Arc<dyn Storage>>,
    connectors: &State<Arc<ConnectorRegistry>>,
) -> ApiResult<auth::AuthOutcome> {
    match user_code {
        Some(code) => start_device_login(&code, storage, connectors).await,
        None => Ok(auth::AuthOutcome::Json(Json(json!({ "prompt": "enter user_code" })))),
    }
}

#[derive(FromForm)]
struct VerifyForm {
    user_code: String,
}

#[post("/device/auth/verify_code", data = "<form>")]
async fn verify_code(
    form: Form<VerifyForm>,
    ip: ClientIp,
    storage: &State<Arc<dyn Storage>>,
    connectors: &State<Arc<ConnectorRegistry>>,
) -> ApiResult<auth::AuthOutcome> {
    ratelimit::check_device_verify(&ip.0)?;
    start_device_login(&form.into_inner().user_code, storage, connectors).await
}

/// Looks up the pending `DeviceRequest` behind `user_code` and creates an
/// internal `AuthRequest` seeded with `redirect_uri = DEVICE_CALLBACK_URI`
/// and `state = device_code`, then hands off to `api::auth::begin_login`
/// exactly like a browser-initiated `/auth` call would.
async fn start_device_login(user_code: &str, storage: &Arc<dyn Storage>, connectors: &ConnectorRegistry) -> ApiResult<auth::AuthOutcome> {
    let device_req = device::lookup_by_user_code(storage, user_code).await?;
    let params = NewAuthRequestParams {
        client_id: device_req.client_id,
        response_types: vec!["code".to_string()],
        scopes: device_req.scopes,
        redirect_uri: DEVICE_CALLBACK_URI.to_string(),
        nonce: None,
        state: Some(device_req.device_code),
        force_approval: false,
        code_challenge: None,
        code_challenge_method: None,
    };
    let req = auth_request::create(storage, params).await?;
    auth::begin_login(connectors, &req).await
}

#[derive(FromForm)]
struct DeviceTokenForm {
    device_code: String,
}

#[post("/device/token", data = "<form>")]
async fn device_token(form: Form<DeviceTokenForm>, storage: &State<Arc<dyn Storage>>) -> ApiResult<Json<Value>> {
    match device::poll(storage, &form.into_inner().device_code).await? {
        device::PollOutcome::Pending => Err(Error::oidc(crate::error::ErrorKind::AuthorizationPending, "authorization pending")),
        device::PollOutcome::SlowDown => Err(Error::oidc(crate::error::ErrorKind::SlowDown, "polling too fast, slow down")),
        device::PollOutcome::Complete(body) => Ok(Json(body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyManager;
    use crate::storage::{Client, Connector};
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client as TestClient;

    async fn rocket_with_fixtures() -> rocket::Rocket<rocket::Build> {
        let storage: Arc<dyn Storage> = Arc::new(crate::storage::memory::MemoryStorage::new());
        storage
            .create_client(Client {
                id: "device-client".into(),
                secret_hash: None,
                public: true,
                redirect_uris: vec![],
                trusted_peers: vec![],
                name: "device-client".into(),
                logo_url: None,
                allow_password_grant: false,
                skip_approval_screen: true,
            })
            .await
            .unwrap();
        storage.create_connector(Connector { id: "mock".into(), connector_type: "mock".into(), name: "mock".into(), resource_version: 1, config: json!({}) }).await.unwrap();
        let connectors = Arc::new(ConnectorRegistry::new(storage.clone()));
        let keys = Arc::new(KeyManager::new(storage.clone()));
        rocket::build()
            .manage(storage)
            .manage(connectors)
            .manage(keys)
            .mount("/", routes())
            .mount("/", crate::api::auth::routes())
    }

    #[tokio::test]
    async fn device_code_issues_pairable_codes() {
        let client = TestClient::tracked(rocket_with_fixtures().await).await.unwrap();
        let response = client.post("/device/code").header(ContentType::Form).body("client_id=device-client&scope=openid").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        assert!(body["device_code"].is_string());
        assert!(body["user_code"].as_str().unwrap().contains('-'));
    }

    #[tokio::test]
    async fn polling_before_verification_is_pending() {
        let client = TestClient::tracked(rocket_with_fixtures().await).await.unwrap();
        let start = client.post("/device/code").header(ContentType::Form).body("client_id=device-client&scope=openid").dispatch().await;
        let body: Value = start.into_json().await.unwrap();
        let device_code = body["device_code"].as_str().unwrap().to_string();

        let poll = client.post("/device/token").header(ContentType::Form).body(format!("device_code={device_code}")).dispatch().await;
        assert_eq!(poll.status(), Status::BadRequest);
        let poll_body: Value = poll.into_json().await.unwrap();
        assert_eq!(poll_body["error"], "authorization_pending");
    }
}

//
// Authorization endpoint + connector handoff + consent (E's HTTP surface)
//
// `/auth` only ever creates the `AuthRequest` and hands the caller a choice
// of connector (spec §4.4 step 1: "may dispatch to `/auth/{conn}`"). Picking
// and rendering that choice is the embedder's job — this crate returns JSON
// describing the options rather than an HTML picker, the same way it returns
// JSON rather than a consent page at `/approval` (both covered by the
// "rendering the consent UI" Non-goal). When exactly one connector is
// registered the choice is made for the caller and skipped via a redirect.
//
use std::collections::HashMap;
use std::sync::Arc;

use rocket::{
    form::Form,
    get,
    post,
    request::{FromRequest, Request},
    response::{self, Redirect, Responder},
    serde::json::Json,
    FromForm, Route, State,
};
use serde_json::{json, Value};

use crate::{
    api::bundle,
    auth_request::{self, NewAuthRequestParams},
    config::CONFIG,
    connector::{ConnectorRegistry, Identity},
    device,
    error::{ApiResult, Error},
    keys::KeyManager,
    storage::{AuthRequest, Storage},
};

/// The special `redirect_uri` the device-verification flow seeds its
/// internal auth requests with (also recognized by `auth_request::
/// is_special_public_redirect`); `/approval`'s grant branch checks for it to
/// mint tokens directly instead of redirecting to a (nonexistent) RP.
pub const DEVICE_CALLBACK_URI: &str = "/device/callback";

pub fn routes() -> Vec<Route> {
    rocket::routes![
        auth_get,
        auth_post,
        auth_connector,
        login_get,
        login_post,
        callback_get,
        callback_post,
        approval_get,
        approval_post,
    ]
}

/// Either a 302 handoff or a JSON description of pending state, depending on
/// what the caller needs next. Grounded on `Error`'s own `Delivery`
/// dispatch in `error.rs` — same idea, applied to success responses.
pub enum AuthOutcome {
    Redirect(Redirect),
    Json(Json<Value>),
}

impl<'r> Responder<'r, 'static> for AuthOutcome {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        match self {
            AuthOutcome::Redirect(r) => r.respond_to(req),
            AuthOutcome::Json(j) => j.respond_to(req),
        }
    }
}

/// Captures every query-string pair regardless of name, for the connector
/// callback leg where the parameter set is connector-defined. Ported from
/// the teacher's pattern of reading raw query data off `Request` rather than
/// declaring every possible upstream IdP's response fields up front.
pub struct RawQuery(pub HashMap<String, String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RawQuery {
    type Error = std::convert::Infallible;

    async fn from_request(req: &'r Request<'_>) -> rocket::request::Outcome<Self, Self::Error> {
        let map = req
            .uri()
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_str().as_bytes()).into_owned().collect())
            .unwrap_or_default();
        rocket::request::Outcome::Success(RawQuery(map))
    }
}

#[derive(FromForm)]
pub struct AuthQuery {
    client_id: String,
    response_type: String,
    scope: String,
    redirect_uri: String,
    #[field(default = None)]
    state: Option<String>,
    #[field(default = None)]
    nonce: Option<String>,
    #[field(default = None)]
    code_challenge: Option<String>,
    #[field(default = None)]
    code_challenge_method: Option<String>,
    #[field(default = None)]
    prompt: Option<String>,
}

impl AuthQuery {
    fn into_params(self) -> NewAuthRequestParams {
        NewAuthRequestParams {
            client_id: self.client_id,
            response_types: self.response_type.split_whitespace().map(str::to_string).collect(),
            scopes: self.scope.split_whitespace().map(str::to_string).collect(),
            redirect_uri: self.redirect_uri,
            nonce: self.nonce,
            state: self.state,
            force_approval: self.prompt.as_deref() == Some("consent"),
            code_challenge: self.code_challenge,
            code_challenge_method: self.code_challenge_method,
        }
    }
}

/// Dispatches a freshly created `AuthRequest` to its next step: straight to
/// the sole registered connector, or a JSON menu when there's a choice.
pub async fn begin_login(connectors: &ConnectorRegistry, req: &AuthRequest) -> ApiResult<AuthOutcome> {
    let available = connectors.list().await?;
    if available.len() == 1 {
        let url = format!("{}/auth/{}?req={}", CONFIG.issuer(), available[0].id, req.id);
        return Ok(AuthOutcome::Redirect(Redirect::to(url)));
    }
    let options: Vec<Value> = available.iter().map(|c| json!({ "id": c.id, "name": c.name })).collect();
    Ok(AuthOutcome::Json(Json(json!({ "req": req.id, "connectors": options }))))
}

#[get("/auth?<q..>")]
async fn auth_get(q: AuthQuery, storage: &State<Arc<dyn Storage>>, connectors: &State<Arc<ConnectorRegistry>>) -> ApiResult<AuthOutcome> {
    let req = auth_request::create(storage, q.into_params()).await?;
    begin_login(connectors, &req).await
}

#[post("/auth", data = "<form>")]
async fn auth_post(form: Form<AuthQuery>, storage: &State<Arc<dyn Storage>>, connectors: &State<Arc<ConnectorRegistry>>) -> ApiResult<AuthOutcome> {
    let req = auth_request::create(storage, form.into_inner().into_params()).await?;
    begin_login(connectors, &req).await
}

#[get("/auth/<connector>?<req>")]
async fn auth_connector(connector: String, req: String, storage: &State<Arc<dyn Storage>>, connectors: &State<Arc<ConnectorRegistry>>) -> ApiResult<AuthOutcome> {
    let auth_req = storage.get_auth_request(&req).await.map_err(|_| Error::invalid_request("unknown or expired auth request"))?;
    let (instance, _) = connectors.get(&connector).await?;

    if let Some(callback) = &instance.callback {
        let callback_url = format!("{}/callback/{}", CONFIG.issuer(), connector);
        let url = callback.login_url(&auth_req.scopes, &callback_url, &auth_req.id).await?;
        return Ok(AuthOutcome::Redirect(Redirect::to(url)));
    }
    if let Some(saml) = &instance.saml {
        let (action, value) = saml.post_data(&auth_req.scopes, &auth_req.id).await?;
        return Ok(AuthOutcome::Json(Json(json!({ "method": "POST", "action": action, "value": value, "req": auth_req.id }))));
    }
    if instance.password.is_some() {
        return Ok(AuthOutcome::Json(Json(json!({ "method": "password", "req": auth_req.id }))));
    }
    Err(Error::invalid_request("connector does not support any login capability"))
}

#[get("/auth/<connector>/login?<req>")]
fn login_get(connector: String, req: String) -> Json<Value> {
    Json(json!({ "method": "password", "connector": connector, "req": req }))
}

#[derive(FromForm)]
struct LoginForm {
    req: String,
    username: String,
    password: String,
}

#[post("/auth/<connector>/login", data = "<form>")]
async fn login_post(connector: String, form: Form<LoginForm>, storage: &State<Arc<dyn Storage>>, connectors: &State<Arc<ConnectorRegistry>>) -> ApiResult<Redirect> {
    let form = form.into_inner();
    let auth_req = storage.get_auth_request(&form.req).await.map_err(|_| Error::invalid_request("unknown or expired auth request"))?;
    let (instance, _) = connectors.get(&connector).await?;
    let password = instance.require_password()?;
    let identity = password
        .login(&auth_req.scopes, &form.username, &form.password)
        .await?
        .ok_or_else(|| Error::access_denied("invalid username or password"))?;
    finish_login(storage, &connector, &form.req, identity).await
}

#[get("/callback/<connector>")]
async fn callback_get(connector: String, query: RawQuery, storage: &State<Arc<dyn Storage>>, connectors: &State<Arc<ConnectorRegistry>>) -> ApiResult<Redirect> {
    let mut query = query.0;
    let req_id = query.remove("req").or_else(|| query.remove("state")).ok_or_else(|| Error::invalid_request("missing auth request reference"))?;
    let auth_req = storage.get_auth_request(&req_id).await.map_err(|_| Error::invalid_request("unknown or expired auth request"))?;
    let (instance, _) = connectors.get(&connector).await?;
    let callback = instance.require_callback()?;
    let identity = callback.handle_callback(&auth_req.scopes, &query).await?;
    finish_login(storage, &connector, &req_id, identity).await
}

#[derive(FromForm)]
struct SamlCallback {
    #[field(name = "RelayState")]
    relay_state: String,
    #[field(name = "SAMLResponse")]
    saml_response: String,
}

#[post("/callback/<connector>", data = "<form>")]
async fn callback_post(connector: String, form: Form<SamlCallback>, storage: &State<Arc<dyn Storage>>, connectors: &State<Arc<ConnectorRegistry>>) -> ApiResult<Redirect> {
    let form = form.into_inner();
    let auth_req = storage.get_auth_request(&form.relay_state).await.map_err(|_| Error::invalid_request("unknown or expired auth request"))?;
    let (instance, _) = connectors.get(&connector).await?;
    let saml = instance.saml.as_ref().ok_or_else(|| Error::invalid_request("connector does not support SAML"))?;
    let identity = saml.handle_post(&auth_req.scopes, &form.saml_response, &form.relay_state).await?;
    finish_login(storage, &connector, &form.relay_state, identity).await
}

async fn finish_login(storage: &Arc<dyn Storage>, connector_id: &str, req_id: &str, identity: Identity) -> ApiResult<Redirect> {
    let req = auth_request::mark_logged_in(storage, req_id, connector_id, &identity).await?;
    let tag = auth_request::continuity_tag(&req);
    Ok(Redirect::to(format!("{}/approval?req={}&hmac={}", CONFIG.issuer(), req.id, tag)))
}

#[get("/approval?<req>&<hmac>")]
async fn approval_get(req: String, hmac: String, storage: &State<Arc<dyn Storage>>, keys: &State<Arc<KeyManager>>) -> ApiResult<AuthOutcome> {
    let auth_req = storage.get_auth_request(&req).await.map_err(|_| Error::invalid_request("auth request not found or already consumed"))?;
    if !auth_request::verify_continuity(&auth_req, &hmac) {
        return Err(Error::invalid_request("invalid continuity tag"));
    }
    let client = storage.get_client(&auth_req.client_id).await?;
    if auth_request::skips_approval(&client) {
        return finish_approval(storage, keys, &req, &hmac, true).await;
    }
    Ok(AuthOutcome::Json(Json(json!({
        "req": req,
        "hmac": hmac,
        "client_id": client.id,
        "client_name": client.name,
        "scopes": auth_req.scopes,
    }))))
}

#[derive(FromForm)]
struct ApprovalForm {
    req: String,
    hmac: String,
    #[field(default = None)]
    consent: Option<String>,
}

#[post("/approval", data = "<form>")]
async fn approval_post(form: Form<ApprovalForm>, storage: &State<Arc<dyn Storage>>, keys: &State<Arc<KeyManager>>) -> ApiResult<AuthOutcome> {
    let form = form.into_inner();
    let consented = !matches!(form.consent.as_deref(), Some("false") | Some("0") | Some("deny") | Some("no"));
    finish_approval(storage, keys, &form.req, &form.hmac, consented).await
}

async fn finish_approval(storage: &Arc<dyn Storage>, keys: &Arc<KeyManager>, req: &str, hmac: &str, consented: bool) -> ApiResult<AuthOutcome> {
    match auth_request::approve(storage, req, hmac, consented).await? {
        auth_request::Approval::Denied(redirect_uri, state) => {
            if redirect_uri == DEVICE_CALLBACK_URI {
                return Ok(AuthOutcome::Json(Json(json!({ "error": "access_denied" }))));
            }
            let mut url = url::Url::parse(&redirect_uri).map_err(|_| Error::server_error("invalid redirect_uri"))?;
            url.query_pairs_mut().append_pair("error", "access_denied");
            if !state.is_empty() {
                url.query_pairs_mut().append_pair("state", &state);
            }
            Ok(AuthOutcome::Redirect(Redirect::to(url.to_string())))
        }
        auth_request::Approval::Granted(code, state) => {
            if code.redirect_uri == DEVICE_CALLBACK_URI {
                // `state` here is the device_code we stashed in
                // `AuthRequest.state` when `api::device` seeded this request.
                let audience = vec![code.client_id.clone()];
                let response = bundle::mint(keys, storage, &code.client_id, audience, None, &code.scopes, code.nonce.clone(), &code.claims, &code.connector_id, code.connector_data.clone()).await?;
                device::complete(storage, &state, response).await?;
                return Ok(AuthOutcome::Json(Json(json!({ "status": "complete" }))));
            }
            let mut url = url::Url::parse(&code.redirect_uri).map_err(|_| Error::server_error("invalid redirect_uri"))?;
            url.query_pairs_mut().append_pair("code", &code.id);
            if !state.is_empty() {
                url.query_pairs_mut().append_pair("state", &state);
            }
            Ok(AuthOutcome::Redirect(Redirect::to(url.to_string())))
        }
    }
}

//
// Dynamic client registration (J, RFC 7591 subset)
//
// Validates the minimal metadata this crate understands and mints
// `client_id`/`client_secret` for a fresh confidential client (spec §4,
// component J; §8 scenario 5). Fields this crate doesn't implement
// (encryption algorithms, JWKS-by-reference, software statements, ...) are
// rejected outright with `invalid_client_metadata` rather than silently
// ignored, matching RFC 7591 §3.2.2's guidance that a server reject
// metadata it cannot honor.
//
use std::sync::Arc;

use rocket::{http::Status, post, serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    crypto, secrets,
    storage::{Client, Storage},
};

pub fn routes() -> Vec<Route> {
    rocket::routes![register]
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct RegistrationRequest {
    redirect_uris: Vec<String>,
    #[serde(default)]
    client_name: Option<String>,
    #[serde(default)]
    logo_uri: Option<String>,
    #[serde(default)]
    token_endpoint_auth_method: Option<String>,
    #[serde(default)]
    grant_types: Option<Vec<String>>,

    // Metadata this crate deliberately does not implement. Their presence,
    // not their value, is what makes the request invalid.
    #[serde(default)]
    userinfo_encrypted_response_alg: Option<Value>,
    #[serde(default)]
    request_object_signing_alg: Option<Value>,
    #[serde(default)]
    jwks_uri: Option<Value>,
    #[serde(default)]
    software_statement: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
struct RegistrationResponse {
    client_id: String,
    client_secret: String,
    redirect_uris: Vec<String>,
    client_name: Option<String>,
    token_endpoint_auth_method: &'static str,
    grant_types: Vec<String>,
}

#[post("/client", data = "<body>")]
async fn register(body: Json<RegistrationRequest>, storage: &State<Arc<dyn Storage>>) -> Result<(Status, Json<RegistrationResponse>), crate::error::Error> {
    let body = body.into_inner();

    if body.userinfo_encrypted_response_alg.is_some()
        || body.request_object_signing_alg.is_some()
        || body.jwks_uri.is_some()
        || body.software_statement.is_some()
    {
        return Err(crate::error::Error::oidc(crate::error::ErrorKind::InvalidClientMetadata, "unsupported client metadata field"));
    }
    if body.redirect_uris.is_empty() {
        return Err(crate::error::Error::oidc(crate::error::ErrorKind::InvalidClientMetadata, "redirect_uris must be non-empty"));
    }
    if let Some(method) = &body.token_endpoint_auth_method {
        if method != "client_secret_basic" && method != "client_secret_post" {
            return Err(crate::error::Error::oidc(crate::error::ErrorKind::InvalidClientMetadata, format!("unsupported token_endpoint_auth_method `{method}`")));
        }
    }

    let client_id = crypto::generate_opaque_token()?;
    let client_secret = crypto::generate_opaque_token()?;
    let secret_hash = secrets::hash_client_secret(&client_secret)?;

    let client = Client {
        id: client_id.clone(),
        secret_hash: Some(secret_hash),
        public: false,
        redirect_uris: body.redirect_uris.clone(),
        trusted_peers: Vec::new(),
        name: body.client_name.clone().unwrap_or_else(|| client_id.clone()),
        logo_url: body.logo_uri.clone(),
        allow_password_grant: false,
        skip_approval_screen: false,
    };
    storage.create_client(client).await?;

    Ok((
        Status::Created,
        Json(RegistrationResponse {
            client_id,
            client_secret,
            redirect_uris: body.redirect_uris,
            client_name: body.client_name,
            token_endpoint_auth_method: "client_secret_basic",
            grant_types: body.grant_types.unwrap_or_else(|| vec!["authorization_code".to_string()]),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use rocket::local::asynchronous::Client as TestClient;

    async fn rocket_with_storage() -> rocket::Rocket<rocket::Build> {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        rocket::build().manage(storage).mount("/", routes())
    }

    #[tokio::test]
    async fn registers_a_confidential_client() {
        let client = TestClient::tracked(rocket_with_storage().await).await.unwrap();
        let response = client
            .post("/client")
            .header(rocket::http::ContentType::JSON)
            .body(r#"{"redirect_uris":["https://c.example.org/cb"]}"#)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);
        let body: Value = response.into_json().await.unwrap();
        assert!(body["client_id"].is_string());
        assert!(body["client_secret"].is_string());
    }

    #[tokio::test]
    async fn rejects_unsupported_metadata() {
        let client = TestClient::tracked(rocket_with_storage().await).await.unwrap();
        let response = client
            .post("/client")
            .header(rocket::http::ContentType::JSON)
            .body(r#"{"redirect_uris":["https://c.example.org/cb"],"userinfo_encrypted_response_alg":"RSA1_5"}"#)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["error"], "invalid_client_metadata");
    }
}

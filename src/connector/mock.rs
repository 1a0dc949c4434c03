//
// In-memory mock connector: a worked example of the capability contract and
// the fixture used by the auth-request / token-endpoint unit tests. Not a
// concrete connector in the product sense (spec §1 Non-goals) — it exists so
// the state machine has something to drive without a real upstream IdP.
//
use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use super::{CallbackConnector, ConnectorInstance, GroupsConnector, Identity, PasswordConnector, RefreshConnector};
use crate::error::ApiResult;

#[derive(Debug, Clone, Deserialize)]
struct MockUser {
    password: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    groups: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct MockConfig {
    #[serde(default)]
    users: HashMap<String, MockUser>,
}

struct Mock {
    users: HashMap<String, MockUser>,
}

impl Mock {
    fn identity_for(&self, username: &str) -> Identity {
        let user = self.users.get(username);
        Identity {
            user_id: format!("mock-{username}"),
            username: username.to_string(),
            preferred_username: username.to_string(),
            email: user.map(|u| u.email.clone()).unwrap_or_default(),
            email_verified: user.is_some(),
            groups: user.map(|u| u.groups.clone()).unwrap_or_default(),
            connector_data: username.as_bytes().to_vec(),
        }
    }
}

#[rocket::async_trait]
impl PasswordConnector for Mock {
    async fn login(&self, _scopes: &[String], username: &str, password: &str) -> ApiResult<Option<Identity>> {
        match self.users.get(username) {
            Some(user) if crate::crypto::ct_eq(user.password.as_bytes(), password.as_bytes()) => Ok(Some(self.identity_for(username))),
            _ => Ok(None),
        }
    }
}

#[rocket::async_trait]
impl CallbackConnector for Mock {
    async fn login_url(&self, _scopes: &[String], callback_url: &str, state: &str) -> ApiResult<String> {
        Ok(format!("{callback_url}?mock=1&state={state}"))
    }

    async fn handle_callback(&self, _scopes: &[String], query: &HashMap<String, String>) -> ApiResult<Identity> {
        let username = query.get("username").cloned().unwrap_or_else(|| "anonymous".to_string());
        Ok(self.identity_for(&username))
    }
}

#[rocket::async_trait]
impl RefreshConnector for Mock {
    async fn refresh(&self, _scopes: &[String], identity: Identity) -> ApiResult<Identity> {
        Ok(self.identity_for(&identity.username))
    }
}

#[rocket::async_trait]
impl GroupsConnector for Mock {
    async fn groups(&self, identity: &Identity) -> ApiResult<Vec<String>> {
        Ok(self.users.get(&identity.username).map(|u| u.groups.clone()).unwrap_or_default())
    }
}

pub fn build(config: &Value) -> ApiResult<ConnectorInstance> {
    let parsed: MockConfig = serde_json::from_value(config.clone()).unwrap_or_default();
    let mock = std::sync::Arc::new(Mock { users: parsed.users });
    Ok(ConnectorInstance {
        id: String::new(),
        callback: Some(mock.clone()),
        password: Some(mock.clone()),
        saml: None,
        refresh: Some(mock.clone()),
        token_identity: None,
        groups: Some(mock),
    })
}

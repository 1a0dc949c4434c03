//
// In-memory reference implementation of `Storage` (SPEC_FULL §6).
//
// Single-process only — no cross-instance coherence, which is fine for a
// crate whose Non-goal is shipping a persistence layer. Each record lives
// behind its own `tokio::sync::Mutex` so `update_*` can hold the lock for
// the whole `old -> new` transform: unlike a SQL-backed implementation
// (`WHERE version = ?`, genuinely racing against other processes), this
// backend's "CAS retry" loop never actually retries, since no other writer
// can interleave while the lock is held. It still exposes the same
// `old -> new` contract so a SQL-backed `Storage` can be dropped in later
// without touching callers.
//
use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;
use tokio::sync::Mutex;

use super::{
    AuthCode, AuthRequest, Client, Connector, DeviceRequest, DeviceToken, Keys, OfflineSession, Password, RefreshToken, Storage, UpdateFn,
};
use crate::error::ApiResult;

type Row<T> = Arc<Mutex<T>>;

fn row<T>(value: T) -> Row<T> {
    Arc::new(Mutex::new(value))
}

async fn update_row<T: Clone>(row: &Row<T>, f: UpdateFn<T>) -> ApiResult<T> {
    let mut guard = row.lock().await;
    let new = f(guard.clone())?;
    *guard = new.clone();
    Ok(new)
}

#[derive(Default)]
pub struct MemoryStorage {
    clients: DashMap<String, Row<Client>>,
    auth_requests: DashMap<String, Row<AuthRequest>>,
    auth_codes: DashMap<String, AuthCode>,
    refresh_tokens: DashMap<String, Row<RefreshToken>>,
    offline_sessions: DashMap<(String, String), Row<OfflineSession>>,
    device_requests_by_user_code: DashMap<String, DeviceRequest>,
    device_requests_by_device_code: DashMap<String, String>,
    device_tokens: DashMap<String, Row<DeviceToken>>,
    keys: Mutex<Option<Keys>>,
    connectors: DashMap<String, Row<Connector>>,
    passwords: DashMap<String, Password>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[rocket::async_trait]
impl Storage for MemoryStorage {
    async fn create_client(&self, client: Client) -> ApiResult<()> {
        self.clients.insert(client.id.clone(), row(client));
        Ok(())
    }

    async fn get_client(&self, id: &str) -> ApiResult<Client> {
        let r = self.clients.get(id).ok_or_else(|| super::not_found("client"))?;
        Ok(r.lock().await.clone())
    }

    async fn update_client(&self, id: &str, f: UpdateFn<Client>) -> ApiResult<Client> {
        let r = self.clients.get(id).ok_or_else(|| super::not_found("client"))?.clone();
        update_row(&r, f).await
    }

    async fn delete_client(&self, id: &str) -> ApiResult<()> {
        self.clients.remove(id);
        Ok(())
    }

    async fn create_auth_request(&self, req: AuthRequest) -> ApiResult<()> {
        self.auth_requests.insert(req.id.clone(), row(req));
        Ok(())
    }

    async fn get_auth_request(&self, id: &str) -> ApiResult<AuthRequest> {
        let r = self.auth_requests.get(id).ok_or_else(|| super::not_found("auth request"))?;
        Ok(r.lock().await.clone())
    }

    async fn update_auth_request(&self, id: &str, f: UpdateFn<AuthRequest>) -> ApiResult<AuthRequest> {
        let r = self.auth_requests.get(id).ok_or_else(|| super::not_found("auth request"))?.clone();
        update_row(&r, f).await
    }

    async fn delete_auth_request(&self, id: &str) -> ApiResult<()> {
        self.auth_requests.remove(id);
        Ok(())
    }

    async fn gc_auth_requests(&self, now: i64) -> ApiResult<u64> {
        let mut expired = Vec::new();
        for entry in self.auth_requests.iter() {
            if entry.value().lock().await.expiry < now {
                expired.push(entry.key().clone());
            }
        }
        let count = expired.len() as u64;
        for id in expired {
            self.auth_requests.remove(&id);
        }
        Ok(count)
    }

    async fn create_auth_code(&self, code: AuthCode) -> ApiResult<()> {
        self.auth_codes.insert(code.id.clone(), code);
        Ok(())
    }

    async fn get_auth_code(&self, id: &str) -> ApiResult<AuthCode> {
        self.auth_codes.get(id).map(|r| r.clone()).ok_or_else(|| super::not_found("auth code"))
    }

    async fn delete_auth_code(&self, id: &str) -> ApiResult<()> {
        self.auth_codes.remove(id);
        Ok(())
    }

    async fn create_refresh_token(&self, token: RefreshToken) -> ApiResult<()> {
        self.refresh_tokens.insert(token.id.clone(), row(token));
        Ok(())
    }

    async fn get_refresh_token(&self, id: &str) -> ApiResult<RefreshToken> {
        let r = self.refresh_tokens.get(id).ok_or_else(|| super::not_found("refresh token"))?;
        Ok(r.lock().await.clone())
    }

    async fn update_refresh_token(&self, id: &str, f: UpdateFn<RefreshToken>) -> ApiResult<RefreshToken> {
        let r = self.refresh_tokens.get(id).ok_or_else(|| super::not_found("refresh token"))?.clone();
        update_row(&r, f).await
    }

    async fn delete_refresh_token(&self, id: &str) -> ApiResult<()> {
        self.refresh_tokens.remove(id);
        Ok(())
    }

    async fn get_or_create_offline_session(&self, user_id: &str, connector_id: &str) -> ApiResult<OfflineSession> {
        let key = (user_id.to_string(), connector_id.to_string());
        if let Some(r) = self.offline_sessions.get(&key) {
            return Ok(r.lock().await.clone());
        }
        let fresh = OfflineSession {
            user_id: user_id.to_string(),
            connector_id: connector_id.to_string(),
            refresh: HashMap::new(),
            connector_data: None,
        };
        self.offline_sessions.entry(key).or_insert_with(|| row(fresh.clone()));
        Ok(fresh)
    }

    async fn update_offline_session(&self, user_id: &str, connector_id: &str, f: UpdateFn<OfflineSession>) -> ApiResult<OfflineSession> {
        let key = (user_id.to_string(), connector_id.to_string());
        let r = self
            .offline_sessions
            .entry(key)
            .or_insert_with(|| {
                row(OfflineSession {
                    user_id: user_id.to_string(),
                    connector_id: connector_id.to_string(),
                    refresh: HashMap::new(),
                    connector_data: None,
                })
            })
            .clone();
        update_row(&r, f).await
    }

    async fn gc_offline_sessions(&self, _now: i64) -> ApiResult<u64> {
        // Offline sessions have no expiry of their own; they are retired
        // implicitly when their last refresh-token ref is revoked. Nothing
        // to sweep here beyond dropping sessions with an empty ref map.
        let mut empty = Vec::new();
        for entry in self.offline_sessions.iter() {
            if entry.value().lock().await.refresh.is_empty() {
                empty.push(entry.key().clone());
            }
        }
        let count = empty.len() as u64;
        for key in empty {
            self.offline_sessions.remove(&key);
        }
        Ok(count)
    }

    async fn create_device_request(&self, req: DeviceRequest) -> ApiResult<()> {
        self.device_requests_by_device_code.insert(req.device_code.clone(), req.user_code.clone());
        self.device_requests_by_user_code.insert(req.user_code.clone(), req);
        Ok(())
    }

    async fn get_device_request_by_user_code(&self, user_code: &str) -> ApiResult<DeviceRequest> {
        self.device_requests_by_user_code.get(user_code).map(|r| r.clone()).ok_or_else(|| super::not_found("device request"))
    }

    async fn delete_device_request(&self, device_code: &str) -> ApiResult<()> {
        if let Some((_, user_code)) = self.device_requests_by_device_code.remove(device_code) {
            self.device_requests_by_user_code.remove(&user_code);
        }
        Ok(())
    }

    async fn gc_device_requests(&self, now: i64) -> ApiResult<u64> {
        let mut expired = Vec::new();
        for entry in self.device_requests_by_user_code.iter() {
            if entry.value().expiry < now {
                expired.push(entry.value().device_code.clone());
            }
        }
        let count = expired.len() as u64;
        for device_code in expired {
            self.delete_device_request(&device_code).await?;
            self.device_tokens.remove(&device_code);
        }
        Ok(count)
    }

    async fn create_device_token(&self, token: DeviceToken) -> ApiResult<()> {
        self.device_tokens.insert(token.device_code.clone(), row(token));
        Ok(())
    }

    async fn get_device_token(&self, device_code: &str) -> ApiResult<DeviceToken> {
        let r = self.device_tokens.get(device_code).ok_or_else(|| super::not_found("device token"))?;
        Ok(r.lock().await.clone())
    }

    async fn update_device_token(&self, device_code: &str, f: UpdateFn<DeviceToken>) -> ApiResult<DeviceToken> {
        let r = self.device_tokens.get(device_code).ok_or_else(|| super::not_found("device token"))?.clone();
        update_row(&r, f).await
    }

    async fn delete_device_token(&self, device_code: &str) -> ApiResult<()> {
        self.device_tokens.remove(device_code);
        Ok(())
    }

    async fn get_keys(&self) -> ApiResult<Option<Keys>> {
        Ok(self.keys.lock().await.clone())
    }

    async fn update_keys(&self, f: UpdateFn<Option<Keys>>) -> ApiResult<Keys> {
        let mut guard = self.keys.lock().await;
        let new = f(guard.clone())?;
        *guard = Some(new.clone());
        Ok(new)
    }

    async fn create_connector(&self, connector: Connector) -> ApiResult<()> {
        self.connectors.insert(connector.id.clone(), row(connector));
        Ok(())
    }

    async fn get_connector(&self, id: &str) -> ApiResult<Connector> {
        let r = self.connectors.get(id).ok_or_else(|| super::not_found("connector"))?;
        Ok(r.lock().await.clone())
    }

    async fn update_connector(&self, id: &str, f: UpdateFn<Connector>) -> ApiResult<Connector> {
        let r = self.connectors.get(id).ok_or_else(|| super::not_found("connector"))?.clone();
        update_row(&r, f).await
    }

    async fn delete_connector(&self, id: &str) -> ApiResult<()> {
        self.connectors.remove(id);
        Ok(())
    }

    async fn list_connectors(&self) -> ApiResult<Vec<Connector>> {
        let mut out = Vec::with_capacity(self.connectors.len());
        for entry in self.connectors.iter() {
            out.push(entry.value().lock().await.clone());
        }
        Ok(out)
    }

    async fn create_password(&self, password: Password) -> ApiResult<()> {
        self.passwords.insert(password.email.clone(), password);
        Ok(())
    }

    async fn get_password(&self, email: &str) -> ApiResult<Password> {
        self.passwords.get(email).map(|r| r.clone()).ok_or_else(|| super::not_found("password"))
    }
}

//! HTTP transport for pushing changes to the sync peer.
//!
//! The wire contract is small: `POST {url}/api/sync` for upserts,
//! `DELETE {url}/api/sync` for tombstones, both carrying a
//! `{ namespace, data }` JSON body, and `POST {url}/api/login` to obtain a
//! session cookie. The trait exists so the dispatcher can be tested against
//! a recording fake.

use async_trait::async_trait;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::Method;
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;

use crate::error::PushError;

/// Body of a sync push.
#[derive(Debug, Clone, Serialize)]
pub struct SyncBody {
    pub namespace: String,
    pub data: serde_json::Value,
}

/// Outbound side of the sync protocol.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Push an upserted record.
    async fn post(&self, url: &str, body: &SyncBody) -> Result<(), PushError>;

    /// Push a deletion tombstone.
    async fn delete(&self, url: &str, body: &SyncBody) -> Result<(), PushError>;

    /// Authenticate against the peer, retaining the session for later
    /// pushes.
    async fn login(&self, url: &str, username: &str, password: &str) -> Result<(), PushError>;
}

/// reqwest-backed [`PushTransport`] holding the peer's session cookie.
pub struct HttpTransport {
    client: reqwest::Client,
    cookie: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            cookie: RwLock::new(None),
        }
    }

    async fn send(&self, method: Method, url: &str, body: &SyncBody) -> Result<(), PushError> {
        let endpoint = format!("{url}/api/sync");
        let mut request = self.client.request(method, &endpoint).json(body);
        if let Some(cookie) = self.cookie.read().await.as_deref() {
            request = request.header(COOKIE, cookie);
        }
        let response = request.send().await.map_err(|source| PushError::Transport {
            url: endpoint.clone(),
            source,
        })?;
        if !response.status().is_success() {
            return Err(PushError::Status {
                url: endpoint,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushTransport for HttpTransport {
    async fn post(&self, url: &str, body: &SyncBody) -> Result<(), PushError> {
        self.send(Method::POST, url, body).await
    }

    async fn delete(&self, url: &str, body: &SyncBody) -> Result<(), PushError> {
        self.send(Method::DELETE, url, body).await
    }

    async fn login(&self, url: &str, username: &str, password: &str) -> Result<(), PushError> {
        let endpoint = format!("{url}/api/login");
        let response = self
            .client
            .post(&endpoint)
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .map_err(|source| PushError::Transport {
                url: endpoint.clone(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(PushError::Status {
                url: endpoint,
                status: response.status().as_u16(),
            });
        }
        if let Some(cookie) = response
            .headers()
            .get(SET_COOKIE)
            .and_then(|v| v.to_str().ok())
        {
            *self.cookie.write().await = Some(cookie.to_string());
        }
        Ok(())
    }
}

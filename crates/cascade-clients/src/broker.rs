//! The secrets broker collaborator: an AppRole-authenticated client against
//! a Vault-compatible HTTP API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::BrokerError;

/// A fetched secret: the broker's reported lease duration plus the raw
/// field map.
#[derive(Debug, Clone)]
pub struct SecretResponse {
    pub lease_duration: Duration,
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// The broker operations the lease cascade depends on.
///
/// Implemented by [`VaultBrokerClient`] for production and by
/// `cascade_clients::fakes::FakeBrokerClient` for tests.
#[async_trait]
pub trait SecretsBrokerClient: Send + Sync {
    /// Perform (or refresh) the AppRole login and cache the resulting
    /// session token. Called by the session controller's refresh loop.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::LoginFailed`] if the broker rejects the
    /// credentials.
    async fn ensure_token(&self) -> Result<(), BrokerError>;

    /// The current session token's reported lifetime. Meaningless before
    /// the first successful `ensure_token`.
    async fn ttl(&self) -> Duration;

    /// Fetch a secret at `path` using the current session token.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NoToken`] if `ensure_token` has not
    /// succeeded yet, or [`BrokerError::NotFound`] if the broker has no
    /// secret at that path.
    async fn get(&self, path: &str) -> Result<SecretResponse, BrokerError>;
}

struct SessionState {
    token: Option<String>,
    lease: Duration,
}

/// Production broker client: logs in via AppRole against a Vault-compatible
/// HTTP API and fetches KV-style secrets with the resulting token.
pub struct VaultBrokerClient {
    http: reqwest::Client,
    address: String,
    role_id: String,
    secret_id: String,
    state: RwLock<SessionState>,
}

#[derive(Deserialize)]
struct LoginResponse {
    auth: LoginAuth,
}

#[derive(Deserialize)]
struct LoginAuth {
    client_token: String,
    lease_duration: u64,
}

#[derive(Deserialize)]
struct SecretApiResponse {
    lease_duration: u64,
    data: serde_json::Map<String, serde_json::Value>,
}

impl VaultBrokerClient {
    /// Build a client against `address` using the given AppRole
    /// credentials. Does not perform any network I/O until
    /// [`ensure_token`](SecretsBrokerClient::ensure_token) is called.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Transport`] only if the underlying HTTP
    /// client fails to build (invalid TLS configuration).
    pub fn new(address: impl Into<String>, role_id: impl Into<String>, secret_id: impl Into<String>) -> Result<Arc<Self>, BrokerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("cascade-worker/0.1")
            .build()?;
        Ok(Arc::new(Self {
            http,
            address: address.into().trim_end_matches('/').to_owned(),
            role_id: role_id.into(),
            secret_id: secret_id.into(),
            state: RwLock::new(SessionState {
                token: None,
                lease: Duration::ZERO,
            }),
        }))
    }

    async fn current_token(&self) -> Result<String, BrokerError> {
        self.state
            .read()
            .await
            .token
            .clone()
            .ok_or(BrokerError::NoToken)
    }
}

#[async_trait]
impl SecretsBrokerClient for VaultBrokerClient {
    async fn ensure_token(&self) -> Result<(), BrokerError> {
        let url = format!("{}/v1/auth/approle/login", self.address);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "role_id": self.role_id,
                "secret_id": self.secret_id,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(BrokerError::LoginFailed {
                reason: format!("HTTP {}", resp.status().as_u16()),
            });
        }

        let body: LoginResponse = resp.json().await?;
        let mut state = self.state.write().await;
        state.token = Some(body.auth.client_token);
        state.lease = Duration::from_secs(body.auth.lease_duration);
        Ok(())
    }

    async fn ttl(&self) -> Duration {
        self.state.read().await.lease
    }

    async fn get(&self, path: &str) -> Result<SecretResponse, BrokerError> {
        let token = self.current_token().await?;
        let url = format!("{}/v1/{}", self.address, path.trim_start_matches('/'));

        let resp = self
            .http
            .get(&url)
            .header("X-Vault-Token", token)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BrokerError::NotFound {
                path: path.to_owned(),
            });
        }
        if !resp.status().is_success() {
            return Err(BrokerError::NotFound {
                path: path.to_owned(),
            });
        }

        let body: SecretApiResponse = resp.json().await?;
        Ok(SecretResponse {
            lease_duration: Duration::from_secs(body.lease_duration),
            data: body.data,
        })
    }
}

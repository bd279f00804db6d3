//! In-process test doubles for the broker and cloud collaborators.
//!
//! Mirrors the production traits exactly so the lease cascade's refresh
//! loops can be driven deterministically in tests, with injectable
//! failures and a controllable clock via `tokio::time::pause`.
#![allow(clippy::expect_used)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;

use crate::broker::{SecretResponse, SecretsBrokerClient};
use crate::cloud::{CloudClient, CloudClientFactory};
use crate::error::{BrokerError, CloudError};

/// A broker double whose `ensure_token`/`get` outcomes are scripted by the
/// test: the first `fail_logins`/`fail_gets` calls to each fail, then every
/// call after succeeds.
pub struct FakeBrokerClient {
    login_calls: AtomicU32,
    get_calls: AtomicU32,
    fail_logins: u32,
    fail_gets: u32,
    token_ttl: Duration,
    secret_ttl: Duration,
    key_payload: Mutex<String>,
    token: Mutex<Option<String>>,
}

impl FakeBrokerClient {
    #[must_use]
    pub fn new(token_ttl: Duration, secret_ttl: Duration) -> Arc<Self> {
        let key_json = serde_json::json!({
            "private_key_id": "fake-key-id",
            "private_key": FAKE_RSA_PRIVATE_KEY,
            "client_email": "fake@example.iam.gserviceaccount.com",
            "token_uri": "https://oauth2.googleapis.com/token",
        })
        .to_string();
        let encoded = base64::engine::general_purpose::STANDARD.encode(key_json);

        Arc::new(Self {
            login_calls: AtomicU32::new(0),
            get_calls: AtomicU32::new(0),
            fail_logins: 0,
            fail_gets: 0,
            token_ttl,
            secret_ttl,
            key_payload: Mutex::new(encoded),
            token: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn with_login_failures(mut self: Arc<Self>, n: u32) -> Arc<Self> {
        Arc::get_mut(&mut self)
            .expect("no other references yet")
            .fail_logins = n;
        self
    }

    #[must_use]
    pub fn with_get_failures(mut self: Arc<Self>, n: u32) -> Arc<Self> {
        Arc::get_mut(&mut self)
            .expect("no other references yet")
            .fail_gets = n;
        self
    }

    /// Replace the raw (unencoded) key payload the next `get` will return,
    /// to exercise malformed-payload scenarios.
    pub fn set_raw_payload(&self, raw: impl Into<String>) {
        *self.key_payload.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = raw.into();
    }

    pub fn login_call_count(&self) -> u32 {
        self.login_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretsBrokerClient for FakeBrokerClient {
    async fn ensure_token(&self) -> Result<(), BrokerError> {
        let n = self.login_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.fail_logins {
            return Err(BrokerError::LoginFailed {
                reason: "injected test failure".to_owned(),
            });
        }
        *self.token.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(format!("fake-token-{n}"));
        Ok(())
    }

    async fn ttl(&self) -> Duration {
        self.token_ttl
    }

    async fn get(&self, path: &str) -> Result<SecretResponse, BrokerError> {
        if self.token.lock().unwrap_or_else(std::sync::PoisonError::into_inner).is_none() {
            return Err(BrokerError::NoToken);
        }
        let n = self.get_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.fail_gets {
            return Err(BrokerError::NotFound {
                path: path.to_owned(),
            });
        }
        let payload = self.key_payload.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
        let mut data = serde_json::Map::new();
        data.insert("private_key_data".to_owned(), serde_json::Value::String(payload));
        Ok(SecretResponse {
            lease_duration: self.secret_ttl,
            data,
        })
    }
}

/// A cloud client-factory double that always succeeds and records calls.
pub struct FakeCloudClientFactory {
    bucket_names: Vec<String>,
}

impl FakeCloudClientFactory {
    #[must_use]
    pub fn new(bucket_names: Vec<String>) -> Self {
        Self { bucket_names }
    }
}

#[async_trait]
impl CloudClientFactory for FakeCloudClientFactory {
    async fn new_client(&self, _credentials_json: &[u8]) -> Result<Arc<dyn CloudClient>, CloudError> {
        Ok(Arc::new(FakeCloudClient {
            bucket_names: self.bucket_names.clone(),
            calls: AtomicU32::new(0),
        }))
    }
}

struct FakeCloudClient {
    bucket_names: Vec<String>,
    calls: AtomicU32,
}

#[async_trait]
impl CloudClient for FakeCloudClient {
    async fn list_buckets(&self, _project_id: &str) -> Result<Vec<String>, CloudError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.bucket_names.clone())
    }
}

// A syntactically valid (but not a real secret) 2048-bit RSA PKCS#8 PEM,
// solely so `jsonwebtoken::EncodingKey::from_rsa_pem` has something to
// parse in tests that exercise the cloud client factory end-to-end.
const FAKE_RSA_PRIVATE_KEY: &str = include_str!("../testdata/fake_rsa_key.pem");

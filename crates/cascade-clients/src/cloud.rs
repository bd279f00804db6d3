//! The cloud API collaborator: builds a short-lived OAuth2-authenticated
//! client from a service-account key and lists buckets with it.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::error::CloudError;
use crate::key::ServiceAccountKey;

const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_only";
const ASSERTION_TTL: Duration = Duration::from_secs(3600);

/// Builds a [`CloudClient`] bound to one service-account key.
///
/// Implemented by [`GcsClientFactory`] for production and by
/// `cascade_clients::fakes::FakeCloudClient` for tests.
#[async_trait]
pub trait CloudClientFactory: Send + Sync {
    /// Build a client authenticated with the given raw (decoded) key JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::InvalidKeyJson`] if `credentials_json` is not
    /// a valid service-account key, or [`CloudError::SigningFailed`] if the
    /// key's private key cannot sign a JWT assertion.
    async fn new_client(&self, credentials_json: &[u8]) -> Result<Arc<dyn CloudClient>, CloudError>;
}

/// The downstream business operation the worker controller performs.
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// List bucket names visible to this client's project.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Api`] on a non-success response.
    async fn list_buckets(&self, project_id: &str) -> Result<Vec<String>, CloudError>;
}

/// Production factory: mints an OAuth2 access token via a signed JWT
/// assertion (the service-account flow), then issues authenticated calls
/// to the Google Cloud Storage JSON API.
#[derive(Default)]
pub struct GcsClientFactory {
    http: reqwest::Client,
}

impl GcsClientFactory {
    /// # Errors
    ///
    /// Returns [`CloudError::Transport`] only if the underlying HTTP
    /// client fails to build.
    pub fn new() -> Result<Self, CloudError> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent("cascade-worker/0.1")
                .build()?,
        })
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenExchangeResponse {
    access_token: String,
}

#[async_trait]
impl CloudClientFactory for GcsClientFactory {
    async fn new_client(&self, credentials_json: &[u8]) -> Result<Arc<dyn CloudClient>, CloudError> {
        let key: ServiceAccountKey =
            serde_json::from_slice(credentials_json).map_err(CloudError::InvalidKeyJson)?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let claims = AssertionClaims {
            iss: &key.client_email,
            scope: STORAGE_SCOPE,
            aud: &key.token_uri,
            iat: now.as_secs(),
            exp: (now + ASSERTION_TTL).as_secs(),
        };

        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(CloudError::SigningFailed)?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
            .map_err(CloudError::SigningFailed)?;

        let resp = self
            .http
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &assertion),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(CloudError::Api {
                status: resp.status().as_u16(),
                message: "OAuth2 token exchange failed".to_owned(),
            });
        }

        let token: TokenExchangeResponse = resp.json().await?;

        Ok(Arc::new(GcsClient {
            http: self.http.clone(),
            access_token: token.access_token,
            key_id: key.private_key_id,
        }))
    }
}

struct GcsClient {
    http: reqwest::Client,
    access_token: String,
    key_id: String,
}

#[derive(Deserialize)]
struct BucketListResponse {
    #[serde(default)]
    items: Vec<BucketItem>,
}

#[derive(Deserialize)]
struct BucketItem {
    name: String,
}

#[async_trait]
impl CloudClient for GcsClient {
    async fn list_buckets(&self, project_id: &str) -> Result<Vec<String>, CloudError> {
        tracing::debug!(key_id = %self.key_id, project_id, "listing buckets");
        let resp = self
            .http
            .get("https://storage.googleapis.com/storage/v1/b")
            .bearer_auth(&self.access_token)
            .query(&[("project", project_id)])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(CloudError::Api {
                status: resp.status().as_u16(),
                message: "bucket listing failed".to_owned(),
            });
        }

        let body: BucketListResponse = resp.json().await?;
        Ok(body.items.into_iter().map(|b| b.name).collect())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    const TEST_KEY_PEM: &str = include_str!("../testdata/fake_rsa_key.pem");

    #[test]
    fn signs_assertion_with_service_account_private_key() {
        let claims = AssertionClaims {
            iss: "fake@example.iam.gserviceaccount.com",
            scope: STORAGE_SCOPE,
            aud: "https://oauth2.googleapis.com/token",
            iat: 1_700_000_000,
            exp: 1_700_003_600,
        };
        let encoding_key = EncodingKey::from_rsa_pem(TEST_KEY_PEM.as_bytes()).unwrap();
        let assertion =
            jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key).unwrap();
        assert!(assertion.split('.').count() == 3);
    }
}

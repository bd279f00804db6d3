//! Role-specific [`Refresher`] implementations wiring the generic
//! controller state machine to the broker and cloud collaborators.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cascade_core::{Controller, Credential, RefreshError, Refresher};
use cascade_clients::{CloudClientFactory, SecretsBrokerClient};

/// Session controller's role: keep the broker session token alive.
///
/// Mirrors the original's unconditional pre-tick rotation — every healthy
/// tick invalidates derived credentials before renewing, since a mid-TTL
/// token rotation may itself change what children are allowed to fetch.
pub struct SessionRefresher {
    broker: Arc<dyn SecretsBrokerClient>,
}

impl SessionRefresher {
    #[must_use]
    pub fn new(broker: Arc<dyn SecretsBrokerClient>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Refresher for SessionRefresher {
    async fn refresh(&self) -> Result<Credential, RefreshError> {
        self.broker.ensure_token().await.map_err(RefreshError::new)?;
        let ttl = self.broker.ttl().await;
        Ok(Credential {
            material: b"session-token-present".to_vec(),
            ttl_seconds: ttl.as_secs(),
            identifier: "session".to_owned(),
        })
    }

    fn healthy_period(&self, credential: &Credential) -> Duration {
        credential.ttl()
    }

    fn unconditional_rotation(&self) -> bool {
        true
    }
}

/// Key controller's role: fetch the derived service-account key from the
/// broker using the session maintained by the session controller.
pub struct KeyRefresher {
    broker: Arc<dyn SecretsBrokerClient>,
    secrets_path: String,
    early_renewal: Duration,
}

impl KeyRefresher {
    #[must_use]
    pub fn new(broker: Arc<dyn SecretsBrokerClient>, secrets_path: String, early_renewal: Duration) -> Self {
        Self {
            broker,
            secrets_path,
            early_renewal,
        }
    }
}

#[async_trait]
impl Refresher for KeyRefresher {
    async fn refresh(&self) -> Result<Credential, RefreshError> {
        let secret = self
            .broker
            .get(&self.secrets_path)
            .await
            .map_err(RefreshError::new)?;
        let (key, raw) = cascade_clients::key::extract_service_account_key(&self.secrets_path, &secret.data)
            .map_err(RefreshError::new)?;
        tracing::info!(private_key_id = %key.private_key_id, "fetched service account key");
        Ok(Credential {
            material: raw,
            ttl_seconds: secret.lease_duration.as_secs(),
            identifier: key.private_key_id,
        })
    }

    fn healthy_period(&self, credential: &Credential) -> Duration {
        let ttl = credential.ttl();
        if ttl > self.early_renewal && ttl - self.early_renewal > Duration::from_secs(60) {
            ttl - self.early_renewal
        } else {
            ttl
        }
    }
}

/// Worker controller's role: rebuild the cloud client from the key
/// controller's current credential and list buckets.
pub struct WorkerRefresher {
    key_controller: Arc<Controller<KeyRefresher>>,
    cloud_factory: Arc<dyn CloudClientFactory>,
    project_id: String,
    interval: Duration,
}

impl WorkerRefresher {
    #[must_use]
    pub fn new(
        key_controller: Arc<Controller<KeyRefresher>>,
        cloud_factory: Arc<dyn CloudClientFactory>,
        project_id: String,
        interval: Duration,
    ) -> Self {
        Self {
            key_controller,
            cloud_factory,
            project_id,
            interval,
        }
    }
}

#[async_trait]
impl Refresher for WorkerRefresher {
    async fn refresh(&self) -> Result<Credential, RefreshError> {
        let key_material = self.key_controller.credential().await;
        if key_material.is_empty() {
            return Err(RefreshError::new(std::io::Error::other(
                "no service account key available from parent controller",
            )));
        }

        let client = self
            .cloud_factory
            .new_client(&key_material.material)
            .await
            .map_err(RefreshError::new)?;
        let buckets = client
            .list_buckets(&self.project_id)
            .await
            .map_err(RefreshError::new)?;

        tracing::info!(count = buckets.len(), "listed buckets");
        Ok(Credential {
            material: vec![1],
            ttl_seconds: self.interval.as_secs(),
            identifier: format!("{}-buckets", buckets.len()),
        })
    }

    fn healthy_period(&self, _credential: &Credential) -> Duration {
        self.interval
    }
}

//! Collaborator clients for the lease cascade: a secrets broker and a cloud
//! API client factory.
//!
//! `cascade-core` never depends on this crate; it only depends on the
//! [`cascade_core::Refresher`](cascade_core::refresher::Refresher) trait.
//! This crate supplies the concrete implementations that the worker binary
//! wires into each controller, plus in-process fakes for tests.

pub mod broker;
pub mod cloud;
pub mod error;
pub mod key;

#[cfg(any(test, feature = "test-util"))]
pub mod fakes;

pub use broker::{SecretResponse, SecretsBrokerClient, VaultBrokerClient};
pub use cloud::{CloudClient, CloudClientFactory, GcsClientFactory};
pub use error::{BrokerError, CloudError};
pub use key::ServiceAccountKey;

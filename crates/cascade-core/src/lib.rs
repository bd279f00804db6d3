//! Lease cascade core.
//!
//! A [`Controller`] owns one TTL-driven credential and refreshes it on a
//! ticker, backing off on failure. Controllers chain into a line — session,
//! issued key, worker — via the [`LeaseObserver`] relation: a parent fans
//! out [`stale`](LeaseObserver::notify_stale_lease) and
//! [`new`](LeaseObserver::notify_new_lease) notifications to its children,
//! who suspend or re-arm accordingly. The domain-specific part of each role
//! (how to actually fetch a credential, how long its healthy period is) is
//! supplied by a [`Refresher`] implementation; the controller itself only
//! knows the state machine.

pub mod backoff;
pub mod controller;
pub mod credential;
pub mod error;
pub mod observer;
pub mod refresher;

pub use backoff::calc_backoff;
pub use controller::Controller;
pub use credential::Credential;
pub use error::{RefreshError, StartError};
pub use observer::LeaseObserver;
pub use refresher::Refresher;

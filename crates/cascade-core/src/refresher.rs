//! The role-specific behavior a [`Controller`](crate::controller::Controller)
//! delegates to: how to fetch a credential and how long to wait before
//! trying again.

use std::time::Duration;

use async_trait::async_trait;

use crate::credential::Credential;
use crate::error::RefreshError;

/// Domain logic for one role in the cascade (session, issued key, worker).
///
/// The controller calls [`refresh`](Refresher::refresh) both on an ordinary
/// ticker tick and on a forced re-arm following a parent's `NewLease`; it
/// does not distinguish the two at the collaborator boundary. For the
/// worker role, "refreshing" means executing the periodic task and
/// rebuilding the downstream client — there is no meaningful credential of
/// its own, so it returns a placeholder [`Credential`] on success.
#[async_trait]
pub trait Refresher: Send + Sync + 'static {
    /// Attempt one refresh. Must not block indefinitely; any I/O deadline
    /// is this implementation's responsibility.
    async fn refresh(&self) -> Result<Credential, RefreshError>;

    /// The ticker period to use after a successful refresh, given the
    /// credential just obtained.
    fn healthy_period(&self, credential: &Credential) -> Duration;

    /// Whether this role must invalidate its children before every renewal
    /// attempt (not only on failure), and must fan out `NewLease` on every
    /// successful tick (not only after a prior failure).
    ///
    /// True only for the session controller, which has no parent and whose
    /// renewal always precedes derived credentials becoming stale.
    fn unconditional_rotation(&self) -> bool {
        false
    }
}

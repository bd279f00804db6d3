//! Error types for the lease cascade core.

/// Failure of a single refresh attempt.
///
/// Opaque by design: the core never inspects *why* a refresh failed, only
/// whether it failed. The wrapped error is preserved for logging.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct RefreshError(#[source] Box<dyn std::error::Error + Send + Sync>);

impl RefreshError {
    /// Wrap any collaborator error as a refresh failure.
    pub fn new(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self(source.into())
    }
}

/// Failure to start a [`Controller`](crate::controller::Controller).
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    /// `start()` was called on a controller that is already running.
    #[error("controller already started")]
    AlreadyStarted,
}
